//! `gerrit-stream`: follow Gerrit events or run one-off commands over SSH.
//!
//! Events go to stdout as JSON lines; logs go to stderr.

mod cli;
mod commands;

use clap::Parser;
use gerrit_stream_ssh::SshConnector;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let endpoint = cli.connection.endpoint()?;
    let connector = SshConnector::new(cli.connection.ssh_options());
    tracing::debug!(address = %endpoint.address(), user = endpoint.username(), "Resolved endpoint");

    match &cli.command {
        Command::Stream(args) => commands::stream(connector, endpoint, args).await,
        Command::Run(args) => commands::run(connector, endpoint, args).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
