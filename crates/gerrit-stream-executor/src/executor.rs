//! Run a command to completion and capture its output.

use gerrit_stream_core::{
    ConnectionError, Connector, DEFAULT_SHUTDOWN_GRACE, DecodeError, Endpoint, Event,
    SessionError, StreamDecoder,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Why a one-shot command failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Command output is not valid JSON: {0}")]
    Json(String),
}

/// Runs short-lived commands, one fresh session per call.
///
/// Holds no per-call state, so concurrent calls through a shared executor
/// are independent.
#[derive(Debug, Clone)]
pub struct CommandExecutor<C> {
    connector: C,
}

impl<C: Connector> CommandExecutor<C> {
    pub const fn new(connector: C) -> Self {
        Self { connector }
    }

    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Run `command` and return everything it wrote to stdout.
    ///
    /// The session is closed and its connection released before returning,
    /// on success and on error.
    ///
    /// # Errors
    /// Returns `ExecError::Connection` if the session cannot be opened and
    /// `ExecError::Session` on a read failure, a non-zero exit status, a
    /// signal, or a missing exit status.
    pub async fn run(&self, endpoint: &Endpoint, command: &str) -> Result<Vec<u8>, ExecError> {
        let mut session = self.connector.open(endpoint, command).await?;
        let session_id = session.id();
        tracing::debug!(%session_id, %command, "Running command");

        let mut output = Vec::new();
        if let Err(e) = session.read_to_end(&mut output).await {
            tracing::warn!(%session_id, error = %e, "Read failed");
            if let Err(shutdown) = session.shutdown(DEFAULT_SHUTDOWN_GRACE).await {
                tracing::debug!(%session_id, error = %shutdown, "Session released");
            }
            return Err(SessionError::from(e).into());
        }

        // Dropping the session inside `wait` closes it.
        let status = session.wait().await?;
        tracing::debug!(%session_id, %status, bytes = output.len(), "Command finished");
        status.into_result()?;
        Ok(output)
    }

    /// Run a command whose output is one JSON record per line, such as
    /// `gerrit query --format=JSON`.
    ///
    /// Malformed lines come back as per-record errors and do not fail the
    /// call.
    ///
    /// # Errors
    /// Same as [`run`](Self::run).
    pub async fn run_records<E: Event>(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<Vec<Result<E, DecodeError>>, ExecError> {
        let output = self.run(endpoint, command).await?;
        let mut decoder = StreamDecoder::new();
        decoder.feed(&output);
        Ok(decoder.finish())
    }

    /// Run a command whose whole output is one JSON document.
    ///
    /// # Errors
    /// Same as [`run`](Self::run), plus `ExecError::Json` if the output does
    /// not decode as `T`.
    pub async fn run_json<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<T, ExecError> {
        let output = self.run(endpoint, command).await?;
        serde_json::from_slice(&output).map_err(|e| ExecError::Json(e.to_string()))
    }
}
