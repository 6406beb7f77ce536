//! Command-line arguments.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gerrit_stream_core::Endpoint;
use gerrit_stream_session::{DecodePolicy, ListenerConfig, listener::DEFAULT_CHANNEL_CAPACITY};
use gerrit_stream_ssh::SshOptions;

/// Stream Gerrit events over SSH.
#[derive(Parser, Debug)]
#[command(name = "gerrit-stream", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Gerrit server as `host[:port]`.
    #[arg(long, env = "GERRIT_SSH_HOST")]
    pub host: String,

    /// SSH port; overrides a port given in `--host`.
    #[arg(long, env = "GERRIT_SSH_PORT")]
    pub port: Option<u16>,

    /// Gerrit account name.
    #[arg(long, short = 'u', env = "GERRIT_SSH_USER")]
    pub user: String,

    /// Private key file. Defaults to `~/.ssh/id_rsa`.
    #[arg(long, short = 'i', env = "GERRIT_SSH_KEY", value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Expected `SHA256:` fingerprint of the server host key.
    #[arg(long, env = "GERRIT_SSH_HOST_KEY", value_name = "FINGERPRINT")]
    pub host_key: Option<String>,

    /// Seconds allowed for connecting and starting the command.
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub connect_timeout: u64,

    /// Seconds between SSH keepalives; 0 disables them.
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub keepalive: u64,
}

impl ConnectionArgs {
    /// Resolve the endpoint, filling in the default key path.
    pub fn endpoint(&self) -> anyhow::Result<Endpoint> {
        let key = match &self.key {
            Some(key) => key.clone(),
            None => default_key_path().context("cannot locate home directory for default key")?,
        };
        let mut endpoint = Endpoint::from_address(&self.host, &self.user, key)?;
        if let Some(port) = self.port {
            endpoint = endpoint.with_port(port);
        }
        if let Some(fingerprint) = &self.host_key {
            endpoint = endpoint.with_host_key_fingerprint(fingerprint);
        }
        Ok(endpoint)
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            keepalive_interval: (self.keepalive > 0).then(|| Duration::from_secs(self.keepalive)),
        }
    }
}

fn default_key_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("id_rsa"))
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow `gerrit stream-events` until interrupted.
    Stream(StreamArgs),
    /// Run `gerrit <ARGS>` once and print its output.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Only receive this event kind. Repeatable.
    #[arg(long, short = 's', value_name = "KIND")]
    pub subscribe: Vec<String>,

    /// Print records untyped, keeping every field the server sent.
    #[arg(long)]
    pub raw: bool,

    /// Stop on the first record that fails to decode.
    #[arg(long)]
    pub fatal_decode: bool,

    /// Events buffered before the stream is throttled.
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY, value_name = "N")]
    pub channel_capacity: usize,
}

impl StreamArgs {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            channel_capacity: self.channel_capacity,
            decode_policy: if self.fatal_decode {
                DecodePolicy::Fatal
            } else {
                DecodePolicy::Skip
            },
            ..ListenerConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Subcommand and arguments, e.g. `version` or `query status:open`.
    #[arg(
        value_name = "ARGS",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_stream_with_subscriptions() {
        let cli = parse(&[
            "gerrit-stream",
            "--host",
            "review.example.com",
            "--user",
            "bot",
            "--key",
            "/keys/id_ed25519",
            "stream",
            "-s",
            "patchset-created",
            "--subscribe",
            "change-merged",
            "--fatal-decode",
        ]);
        let Command::Stream(args) = &cli.command else {
            panic!("expected stream");
        };
        assert_eq!(args.subscribe, ["patchset-created", "change-merged"]);
        assert!(!args.raw);
        assert_eq!(args.listener_config().decode_policy, DecodePolicy::Fatal);
        assert_eq!(args.listener_config().channel_capacity, 64);

        let endpoint = cli.connection.endpoint().unwrap();
        assert_eq!(endpoint.address(), "review.example.com:29418");
        assert_eq!(endpoint.username(), "bot");
        assert_eq!(endpoint.key_path(), PathBuf::from("/keys/id_ed25519"));
    }

    #[test]
    fn test_port_flag_overrides_address() {
        let cli = parse(&[
            "gerrit-stream",
            "--host",
            "review.example.com:2222",
            "--port",
            "29419",
            "-u",
            "bot",
            "-i",
            "/k",
            "--host-key",
            "SHA256:abc",
            "stream",
        ]);
        let endpoint = cli.connection.endpoint().unwrap();
        assert_eq!(endpoint.port(), 29419);
        assert_eq!(endpoint.host_key_fingerprint(), Some("SHA256:abc"));
    }

    #[test]
    fn test_run_keeps_hyphenated_args() {
        let cli = parse(&[
            "gerrit-stream",
            "--host",
            "h",
            "--user",
            "u",
            "--key",
            "/k",
            "run",
            "query",
            "--format=JSON",
            "status:open",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.args, ["query", "--format=JSON", "status:open"]);
    }

    #[test]
    fn test_run_requires_args() {
        assert!(
            Cli::try_parse_from(["gerrit-stream", "--host", "h", "--user", "u", "run"]).is_err()
        );
    }

    #[test]
    fn test_ssh_options() {
        let cli = parse(&[
            "gerrit-stream",
            "--host",
            "h",
            "--user",
            "u",
            "--keepalive",
            "0",
            "--connect-timeout",
            "5",
            "stream",
        ]);
        let options = cli.connection.ssh_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert!(options.keepalive_interval.is_none());
    }

    #[test]
    fn test_invalid_address() {
        let cli = parse(&[
            "gerrit-stream",
            "--host",
            "h:notaport",
            "--user",
            "u",
            "--key",
            "/k",
            "stream",
        ]);
        assert!(cli.connection.endpoint().is_err());
    }
}
