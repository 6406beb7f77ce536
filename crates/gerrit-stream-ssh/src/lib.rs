//! SSH transport for remote command sessions.
//!
//! Provides:
//! - `SshConnector` - `Connector` implementation: public key auth, one
//!   `exec` channel per session
//! - `SshOptions` - Connection timeouts and keepalive

mod client;
pub mod connector;

pub use connector::{SshConnector, SshOptions};
