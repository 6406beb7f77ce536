//! Error taxonomy shared by every crate in the workspace.
//!
//! All errors are values: nothing here logs and exits. They are `Clone` so a
//! terminal failure can be both kept as a listener's last error and delivered
//! to its consumer.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to establish a session: fatal to the attempted open only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Failed to load key {}: {reason}", path.display())]
    Key { path: PathBuf, reason: String },
    #[error("Dial failed: {0}")]
    Dial(String),
    #[error("Connection timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Host key rejected: {0}")]
    HostKey(String),
    #[error("Authentication rejected for user {username}")]
    AuthRejected { username: String },
    #[error("Remote rejected command: {0}")]
    Rejected(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Failure on an open session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Remote command exited with status {0}")]
    ExitStatus(u32),
    #[error("Remote command killed by signal {0}")]
    Signal(String),
    #[error("Remote command ended without reporting an exit status")]
    MissingExitStatus,
    #[error("Session closed")]
    Closed,
    #[error("Session driver failed: {0}")]
    DriverFailed(String),
    #[error("Session not released within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// A single record that could not be turned into an event.
///
/// Never fatal to the stream on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed record ({reason}): {excerpt}")]
    Malformed { excerpt: String, reason: String },
    #[error("Record exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error("Stream ended inside a record ({bytes} bytes unterminated)")]
    Truncated { bytes: usize },
}

/// Invalid lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Listener already running (state: {0})")]
    AlreadyRunning(&'static str),
}
