//! One remote command and its standard output.
//!
//! A transport opens the connection and starts the command, then hands a
//! *driver* future to [`RemoteSession::spawn`]. The driver owns the transport
//! handles for the whole life of the session and pushes stdout bytes into a
//! [`SessionSink`]; the session side reads them through [`AsyncRead`].
//!
//! Closing is a cancellation token: the driver tears the remote side down
//! when it fires, and any read on the session returns end-of-stream at once,
//! whether or not the driver has finished yet. [`RemoteSession::shutdown`]
//! closes and then waits for the driver to let go of the connection.

use std::{
    fmt,
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf},
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::Instrument;
use uuid::Uuid;

use crate::SessionError;

/// Session identifier, used in log fields.
pub type SessionId = Uuid;

/// Bytes buffered between the driver and the reader before the driver is
/// suspended.
const PIPE_CAPACITY: usize = 64 * 1024;

/// How long [`RemoteSession::shutdown`] waits for the driver by default.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// How the remote command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited with this status code.
    Code(u32),
    /// The command was killed by a signal.
    Signal(String),
    /// The remote end closed without reporting either.
    Missing,
}

impl ExitStatus {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Turn anything but a zero exit code into an error.
    ///
    /// # Errors
    /// Returns the matching `SessionError` for non-zero codes, signals and a
    /// missing status.
    pub fn into_result(self) -> Result<(), SessionError> {
        match self {
            Self::Code(0) => Ok(()),
            Self::Code(code) => Err(SessionError::ExitStatus(code)),
            Self::Signal(signal) => Err(SessionError::Signal(signal)),
            Self::Missing => Err(SessionError::MissingExitStatus),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Missing => f.write_str("no exit status"),
        }
    }
}

/// Driver side of a session: where stdout bytes go.
pub struct SessionSink {
    writer: DuplexStream,
    shutdown: CancellationToken,
    session_id: SessionId,
}

impl SessionSink {
    /// Forward a chunk of stdout to the reader.
    ///
    /// Suspends while the reader is behind.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the session was closed while
    /// waiting, or `SessionError::Io` if the reader is gone.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(SessionError::Closed),
            res = self.writer.write_all(data) => res.map_err(SessionError::from),
        }
    }

    /// Resolves once the session has been asked to close.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// Cloneable handle that closes a session from another task.
#[derive(Debug, Clone)]
pub struct SessionCloser(CancellationToken);

impl SessionCloser {
    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.0.cancel();
    }
}

/// A live remote command.
///
/// Reading yields the command's stdout until it exits, the connection
/// drops, or [`close`](Self::close) is called. Dropping the session closes it.
pub struct RemoteSession {
    id: SessionId,
    command: String,
    output: DuplexStream,
    shutdown: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
    driver: Option<JoinHandle<Result<ExitStatus, SessionError>>>,
}

impl RemoteSession {
    /// Start a session whose output is produced by `driver`.
    ///
    /// The driver must return once [`SessionSink::closed`] resolves, after
    /// releasing the remote command and its connection. Must be called
    /// inside a Tokio runtime.
    pub fn spawn<F, Fut>(command: impl Into<String>, driver: F) -> Self
    where
        F: FnOnce(SessionSink) -> Fut,
        Fut: Future<Output = Result<ExitStatus, SessionError>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let command = command.into();
        let (output, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let shutdown = CancellationToken::new();
        let sink = SessionSink {
            writer,
            shutdown: shutdown.clone(),
            session_id: id,
        };

        let span = tracing::debug_span!("session", session_id = %id, command = %command);
        let driver = tokio::spawn(driver(sink).instrument(span));

        Self {
            id,
            command,
            output,
            closed: Box::pin(shutdown.clone().cancelled_owned()),
            shutdown,
            driver: Some(driver),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Terminate the remote command and its connection.
    ///
    /// Idempotent. Returns immediately; a read in progress observes
    /// end-of-stream.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!(session_id = %self.id, "Closing session");
            self.shutdown.cancel();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Handle for closing the session while it is borrowed elsewhere.
    #[must_use]
    pub fn closer(&self) -> SessionCloser {
        SessionCloser(self.shutdown.clone())
    }

    /// Wait for the driver to finish and return how the command ended.
    ///
    /// Does not close the session; call [`close`](Self::close) first to
    /// abandon a command that would otherwise run forever.
    ///
    /// # Errors
    /// Returns the driver's error, or `SessionError::DriverFailed` if it
    /// panicked.
    pub async fn wait(mut self) -> Result<ExitStatus, SessionError> {
        let Some(driver) = self.driver.take() else {
            return Err(SessionError::Closed);
        };
        driver
            .await
            .unwrap_or_else(|e| Err(SessionError::DriverFailed(e.to_string())))
    }

    /// Close the session and wait until the driver has released the remote
    /// command and its connection.
    ///
    /// A driver still running after `grace` is aborted, which drops its
    /// transport handles.
    ///
    /// # Errors
    /// Returns the driver's result as [`wait`](Self::wait) does, or
    /// `SessionError::ShutdownTimeout` if the driver was aborted.
    pub async fn shutdown(mut self, grace: Duration) -> Result<ExitStatus, SessionError> {
        self.close();
        let Some(mut driver) = self.driver.take() else {
            return Err(SessionError::Closed);
        };
        match tokio::time::timeout(grace, &mut driver).await {
            Ok(joined) => {
                joined.unwrap_or_else(|e| Err(SessionError::DriverFailed(e.to_string())))
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %self.id,
                    ?grace,
                    "Driver did not release session, aborting"
                );
                driver.abort();
                Err(SessionError::ShutdownTimeout(grace))
            }
        }
    }
}

impl AsyncRead for RemoteSession {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // Once closed, report end-of-stream without touching the pipe so a
        // pending read never waits on a driver that is still shutting down.
        if this.shutdown.is_cancelled() || this.closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.output).poll_read(cx, buf)
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
