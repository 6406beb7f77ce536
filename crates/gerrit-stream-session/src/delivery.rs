//! Values crossing from the listener task to its consumer.

use std::fmt;

use gerrit_stream_core::{ConnectionError, DecodeError, ExitStatus, SessionError};
use thiserror::Error;

/// Lifecycle of a [`StreamListener`](crate::StreamListener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerState {
    /// Never started.
    Idle,
    Running,
    /// Stop requested; the background task is winding down.
    Stopping,
    /// The last run is over. May be started again.
    Stopped,
}

impl ListenerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a new run may begin from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `stop` was called or the listener was dropped.
    Stopped,
    /// The remote command ended cleanly.
    RemoteExited(ExitStatus),
    Failed(ListenerError),
    /// The receiving half of the channel was dropped.
    ConsumerGone,
}

impl EndReason {
    #[must_use]
    pub const fn error(&self) -> Option<&ListenerError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// One item on the delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<E> {
    Event(E),
    /// A record that could not be decoded. Only sent under
    /// [`DecodePolicy::Skip`](crate::DecodePolicy::Skip); the stream goes on.
    Malformed(DecodeError),
    /// Last item of a run.
    Ended(EndReason),
}

impl<E> Delivery<E> {
    /// The event, if this is one.
    pub fn into_event(self) -> Option<E> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::Ended(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_idle_and_stopped_can_start() {
        assert!(ListenerState::Idle.can_start());
        assert!(ListenerState::Stopped.can_start());
        assert!(!ListenerState::Running.can_start());
        assert!(!ListenerState::Stopping.can_start());
        assert_eq!(ListenerState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn test_end_reason_error() {
        let failed = EndReason::Failed(ListenerError::Session(SessionError::ExitStatus(1)));
        assert_eq!(
            failed.error(),
            Some(&ListenerError::Session(SessionError::ExitStatus(1)))
        );
        assert!(EndReason::Stopped.error().is_none());
        assert!(
            EndReason::RemoteExited(ExitStatus::Code(0))
                .error()
                .is_none()
        );
    }
}
