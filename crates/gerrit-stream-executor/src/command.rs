//! Command line building.

use std::fmt;

use thiserror::Error;

/// Every Gerrit SSH command lives under this program name.
const GERRIT_PROGRAM: &str = "gerrit";

/// Command build error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command is empty")]
    Empty,
    #[error("Failed to quote argument: {0}")]
    Quote(String),
}

impl From<shlex::QuoteError> for CommandError {
    fn from(e: shlex::QuoteError) -> Self {
        Self::Quote(e.to_string())
    }
}

/// Builder for a `gerrit <subcommand> [args...]` command line.
///
/// Arguments are shell-quoted, since the remote side parses the line like a
/// shell would.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GerritCommand {
    subcommand: String,
    args: Vec<String>,
    raw: bool,
}

impl GerritCommand {
    #[must_use]
    pub fn new(subcommand: impl Into<String>) -> Self {
        Self {
            subcommand: subcommand.into(),
            args: Vec::new(),
            raw: false,
        }
    }

    /// A command line sent exactly as given, without the `gerrit` prefix or
    /// any quoting.
    #[must_use]
    pub fn raw(line: impl Into<String>) -> Self {
        Self {
            subcommand: line.into(),
            args: Vec::new(),
            raw: true,
        }
    }

    /// `gerrit stream-events`, optionally limited to some event kinds.
    #[must_use]
    pub fn stream_events<I>(kinds: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        kinds
            .into_iter()
            .fold(Self::new("stream-events"), |cmd, kind| {
                cmd.arg("-s").arg(kind)
            })
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render the command line.
    ///
    /// # Errors
    /// Returns `CommandError::Empty` for a blank subcommand, or
    /// `CommandError::Quote` if an argument cannot be quoted.
    pub fn render(&self) -> Result<String, CommandError> {
        let subcommand = self.subcommand.trim();
        if subcommand.is_empty() {
            return Err(CommandError::Empty);
        }
        if self.raw {
            return Ok(subcommand.to_owned());
        }

        let mut line = format!("{GERRIT_PROGRAM} {subcommand}");
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shlex::try_quote(arg)?);
        }
        Ok(line)
    }
}

impl fmt::Display for GerritCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{GERRIT_PROGRAM} <invalid>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_gerrit() {
        let cmd = GerritCommand::new("stream-events")
            .arg("-s")
            .arg("patchset-created");
        assert_eq!(
            cmd.render().unwrap(),
            "gerrit stream-events -s patchset-created"
        );
    }

    #[test]
    fn test_stream_events_subscriptions() {
        let cmd = GerritCommand::stream_events(["change-merged", "ref-updated"]);
        assert_eq!(
            cmd.render().unwrap(),
            "gerrit stream-events -s change-merged -s ref-updated"
        );
        assert_eq!(
            GerritCommand::stream_events(Vec::<String>::new())
                .render()
                .unwrap(),
            "gerrit stream-events"
        );
    }

    #[test]
    fn test_quotes_arguments() {
        let cmd = GerritCommand::new("query")
            .args(["--format=JSON", "status:open project:foo bar", "it's"]);
        let line = cmd.render().unwrap();
        assert!(line.starts_with("gerrit query "));
        let parsed = shlex::split(&line).unwrap();
        assert_eq!(parsed[..3], ["gerrit", "query", "--format=JSON"]);
        assert_eq!(parsed[3], "status:open project:foo bar");
        assert_eq!(parsed[4], "it's");
    }

    #[test]
    fn test_empty_subcommand() {
        assert_eq!(GerritCommand::new("").render(), Err(CommandError::Empty));
        assert_eq!(GerritCommand::raw("   ").render(), Err(CommandError::Empty));
    }

    #[test]
    fn test_nul_byte_cannot_be_quoted() {
        let err = GerritCommand::new("query").arg("a\0b").render().unwrap_err();
        assert!(matches!(err, CommandError::Quote(_)));
    }

    #[test]
    fn test_raw_is_untouched() {
        let cmd = GerritCommand::raw("gerrit version --verbose");
        assert_eq!(cmd.render().unwrap(), "gerrit version --verbose");
        assert_eq!(cmd.to_string(), "gerrit version --verbose");
    }
}
