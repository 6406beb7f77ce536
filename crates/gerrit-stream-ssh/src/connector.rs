//! [`Connector`] over SSH public-key authentication.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use gerrit_stream_core::{
    ConnectionError, Connector, Endpoint, ExitStatus, RemoteSession, SessionError, SessionSink,
};
use russh::{
    Channel, ChannelMsg, Disconnect,
    client::{self, Handle, Msg},
};

use crate::client::{ClientHandler, connect};

/// Tunables for [`SshConnector`].
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Bound on dialing, authenticating and starting the command.
    pub connect_timeout: Duration,
    /// SSH keepalive interval; `None` disables keepalives.
    pub keepalive_interval: Option<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// Opens one SSH connection per session and runs the command on it.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    #[must_use]
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub const fn options(&self) -> &SshOptions {
        &self.options
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            keepalive_interval: self.options.keepalive_interval,
            ..client::Config::default()
        })
    }

    async fn establish(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<Started, ConnectionError> {
        let handle = connect(endpoint, self.client_config()).await?;

        let channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                hang_up(&handle).await;
                return Err(ConnectionError::Protocol(format!(
                    "failed to open session channel: {e}"
                )));
            }
        };

        match exec(channel, command).await {
            Ok((channel, early)) => Ok(Started {
                handle,
                channel,
                early,
            }),
            Err(e) => {
                hang_up(&handle).await;
                Err(e)
            }
        }
    }
}

/// A started command plus anything it sent before the exec reply.
struct Started {
    handle: Handle<ClientHandler>,
    channel: Channel<Msg>,
    early: Vec<ChannelMsg>,
}

/// Request `command` and wait for the server's verdict.
async fn exec(
    mut channel: Channel<Msg>,
    command: &str,
) -> Result<(Channel<Msg>, Vec<ChannelMsg>), ConnectionError> {
    channel
        .exec(true, command)
        .await
        .map_err(|e| ConnectionError::Protocol(format!("exec request failed: {e}")))?;

    let mut early = Vec::new();
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok((channel, early)),
            Some(ChannelMsg::Failure) => {
                return Err(ConnectionError::Rejected(command.to_owned()));
            }
            Some(msg) => early.push(msg),
            None => {
                return Err(ConnectionError::Protocol(
                    "channel closed before exec reply".into(),
                ));
            }
        }
    }
}

async fn hang_up(handle: &Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!(error = %e, "Disconnect failed");
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<RemoteSession, ConnectionError> {
        tracing::info!(address = %endpoint.address(), user = endpoint.username(), %command, "Opening SSH session");

        let started = tokio::time::timeout(
            self.options.connect_timeout,
            self.establish(endpoint, command),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.options.connect_timeout))??;

        Ok(RemoteSession::spawn(command, move |sink| drive(started, sink)))
    }
}

/// What the channel loop decided after one message.
enum Step {
    Continue,
    Finished,
}

/// Pump channel output into the sink until the command ends or the session
/// is closed, then release the channel and the connection.
async fn drive(started: Started, mut sink: SessionSink) -> Result<ExitStatus, SessionError> {
    let Started {
        handle,
        mut channel,
        early,
    } = started;
    let mut status = ExitStatus::Missing;

    let result: Result<(), SessionError> = async {
        for msg in early {
            if let Step::Finished = handle_msg(msg, &mut sink, &mut status).await? {
                return Ok(());
            }
        }
        loop {
            let msg = tokio::select! {
                biased;
                () = sink.closed() => return Err(SessionError::Closed),
                msg = channel.wait() => msg,
            };
            let Some(msg) = msg else {
                return Ok(());
            };
            if let Step::Finished = handle_msg(msg, &mut sink, &mut status).await? {
                return Ok(());
            }
        }
    }
    .await;

    if let Err(e) = channel.close().await {
        tracing::trace!(error = %e, "Channel already closed");
    }
    hang_up(&handle).await;
    tracing::debug!(session_id = %sink.session_id(), %status, "SSH session finished");

    result.map(|()| status)
}

async fn handle_msg(
    msg: ChannelMsg,
    sink: &mut SessionSink,
    status: &mut ExitStatus,
) -> Result<Step, SessionError> {
    match msg {
        ChannelMsg::Data { data } => sink.send(&data).await?,
        ChannelMsg::ExtendedData { data, ext } => {
            let stderr = String::from_utf8_lossy(&data);
            tracing::debug!(ext, stderr = %stderr.trim_end(), "Remote stderr");
        }
        ChannelMsg::ExitStatus { exit_status } => *status = ExitStatus::Code(exit_status),
        ChannelMsg::ExitSignal {
            signal_name,
            error_message,
            ..
        } => {
            tracing::debug!(?signal_name, %error_message, "Remote command killed");
            *status = ExitStatus::Signal(format!("{signal_name:?}"));
        }
        ChannelMsg::Close => return Ok(Step::Finished),
        _ => {}
    }
    Ok(Step::Continue)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_default_options() {
        let options = SshOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
        assert_eq!(options.keepalive_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_client_config_carries_keepalive() {
        let connector = SshConnector::new(SshOptions {
            connect_timeout: Duration::from_secs(1),
            keepalive_interval: None,
        });
        assert!(connector.client_config().keepalive_interval.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_dialing() {
        let endpoint = Endpoint::new("127.0.0.1", "bot", "/nonexistent/id_rsa").with_port(1);
        let err = SshConnector::default()
            .open(&endpoint, "gerrit version")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Key { path, .. } if path == PathBuf::from("/nonexistent/id_rsa")
        ));
    }

    #[tokio::test]
    async fn test_exit_status_and_stderr_handling() {
        let session = RemoteSession::spawn("x", |mut sink| async move {
            let mut status = ExitStatus::Missing;
            let step = handle_msg(
                ChannelMsg::ExtendedData {
                    data: russh::CryptoVec::from_slice(b"warning\n"),
                    ext: 1,
                },
                &mut sink,
                &mut status,
            )
            .await?;
            assert!(matches!(step, Step::Continue));
            handle_msg(ChannelMsg::ExitStatus { exit_status: 3 }, &mut sink, &mut status).await?;
            let step = handle_msg(ChannelMsg::Close, &mut sink, &mut status).await?;
            assert!(matches!(step, Step::Finished));
            Ok(status)
        });
        assert_eq!(session.wait().await, Ok(ExitStatus::Code(3)));
    }
}
