//! Long-running event ingestion.
//!
//! Provides:
//! - `StreamListener` - Runs a streaming command in a background task
//! - `Delivery` / `EndReason` - What the consumer receives
//! - `ListenerState` / `ListenerConfig` - Lifecycle and tuning

pub mod delivery;
pub mod listener;

pub use delivery::{Delivery, EndReason, ListenerError, ListenerState};
pub use listener::{DecodePolicy, ListenerConfig, StreamListener};
