//! `stream` and `run` subcommands.

use anyhow::{Context, bail};
use gerrit_stream_core::{Endpoint, Event, RawEvent};
use gerrit_stream_executor::{CommandExecutor, GerritCommand};
use gerrit_stream_model::GerritEvent;
use gerrit_stream_session::{Delivery, EndReason, ListenerConfig, StreamListener};
use gerrit_stream_ssh::SshConnector;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, Stdout};

use crate::cli::{RunArgs, StreamArgs};

/// An event the CLI can print and log.
trait Printable: Event + Serialize {
    fn log(&self) {
        tracing::debug!(kind = self.kind(), "Event");
    }
}

impl Printable for RawEvent {}

impl Printable for GerritEvent {
    fn log(&self) {
        let change = self.body().change().and_then(|c| c.number);
        tracing::info!(
            kind = self.kind(),
            project = self.project().unwrap_or("-"),
            change,
            created_on = self.created_on(),
            "Event"
        );
    }
}

pub async fn stream(
    connector: SshConnector,
    endpoint: Endpoint,
    args: &StreamArgs,
) -> anyhow::Result<()> {
    let command = GerritCommand::stream_events(args.subscribe.iter().cloned()).render()?;
    let config = args.listener_config();
    if args.raw {
        follow::<RawEvent>(connector, endpoint, command, config).await
    } else {
        follow::<GerritEvent>(connector, endpoint, command, config).await
    }
}

/// Print deliveries until the run ends or Ctrl-C stops it.
async fn follow<E: Printable>(
    connector: SshConnector,
    endpoint: Endpoint,
    command: String,
    config: ListenerConfig,
) -> anyhow::Result<()> {
    let listener = StreamListener::<_, E>::with_config(connector, endpoint, command, config);
    let mut deliveries = listener
        .take_events()
        .context("delivery channel already taken")?;
    listener.start()?;

    let mut stdout = tokio::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            res = &mut ctrl_c, if !interrupted => {
                res.context("failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, stopping");
                interrupted = true;
                listener.stop();
            }
            // The end marker is dropped if the channel is full at stop time.
            () = listener.wait_stopped(), if interrupted => return Ok(()),
            delivery = deliveries.recv() => match delivery {
                Some(Delivery::Event(event)) => {
                    event.log();
                    print_json(&mut stdout, &event).await?;
                }
                Some(Delivery::Malformed(e)) => {
                    tracing::warn!(error = %e, "Skipped undecodable record");
                }
                Some(Delivery::Ended(reason)) => return finish(reason),
                None => bail!("delivery channel closed"),
            },
        }
    }
}

fn finish(reason: EndReason) -> anyhow::Result<()> {
    match reason {
        EndReason::Failed(e) => Err(e).context("event stream failed"),
        EndReason::Stopped => Ok(()),
        EndReason::RemoteExited(status) => {
            tracing::info!(%status, "Remote stream ended");
            Ok(())
        }
        EndReason::ConsumerGone => bail!("delivery channel dropped"),
    }
}

async fn print_json<T: Serialize>(stdout: &mut Stdout, value: &T) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(value).context("failed to encode event")?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

pub async fn run(connector: SshConnector, endpoint: Endpoint, args: &RunArgs) -> anyhow::Result<()> {
    let Some((subcommand, rest)) = args.args.split_first() else {
        bail!("no command given");
    };
    let command = GerritCommand::new(subcommand.as_str())
        .args(rest.iter().cloned())
        .render()?;

    let output = CommandExecutor::new(connector)
        .run(&endpoint, &command)
        .await
        .with_context(|| format!("`{command}` failed"))?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;
    Ok(())
}
