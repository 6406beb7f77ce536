//! Core abstractions for streaming events from a remote command.
//!
//! This crate provides the fundamental building blocks:
//! - `Endpoint` - Immutable connection parameters
//! - `RemoteSession` - One remote command with its stdout as a byte stream
//! - `Connector` - The transport seam that opens sessions
//! - `StreamDecoder` / `EventCodec` - Newline-delimited JSON framing
//! - `Event` / `RawEvent` - The pluggable decode target

pub mod decoder;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod session;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use decoder::{EventCodec, StreamDecoder};
pub use endpoint::Endpoint;
pub use error::{ConnectionError, DecodeError, SessionError, StateError};
pub use event::{Event, RawEvent};
pub use session::{
    DEFAULT_SHUTDOWN_GRACE, ExitStatus, RemoteSession, SessionCloser, SessionId, SessionSink,
};
pub use traits::Connector;
