//! Connection parameters for a remote host.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConnectionError;

/// Default Gerrit SSH daemon port.
pub const DEFAULT_PORT: u16 = 29418;

/// Immutable connection parameters: where to connect and as whom.
///
/// Owned by whoever constructs a listener or executor. There are no setters;
/// the `with_*` methods consume and return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    username: String,
    key_path: PathBuf,
    #[serde(default)]
    host_key_fingerprint: Option<String>,
}

impl Endpoint {
    /// Create an endpoint on the default Gerrit SSH port.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            key_path: key_path.into(),
            host_key_fingerprint: None,
        }
    }

    /// Create an endpoint from a `host[:port]` address.
    ///
    /// IPv6 hosts must be bracketed when a port is given (`[::1]:29418`).
    ///
    /// # Errors
    /// Returns `ConnectionError::InvalidEndpoint` if the host is empty or the
    /// port is not a valid number.
    pub fn from_address(
        address: &str,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, ConnectionError> {
        let (host, port) = split_address(address.trim())?;
        Ok(Self::new(host, username, key_path).with_port(port))
    }

    /// Use a different port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Pin the server's host key to a `SHA256:` fingerprint.
    #[must_use]
    pub fn with_host_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.host_key_fingerprint = Some(fingerprint.into());
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Path of the private key used for public key authentication.
    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    #[must_use]
    pub fn host_key_fingerprint(&self) -> Option<&str> {
        self.host_key_fingerprint.as_deref()
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_address(address: &str) -> Result<(&str, u16), ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidEndpoint(format!("{address}: {reason}"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        match tail {
            "" => (host, None),
            _ => (
                host,
                Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after ']'"))?,
                ),
            ),
        }
    } else {
        match address.rsplit_once(':') {
            // A bare IPv6 literal has several colons and no port.
            Some((host, _)) if host.contains(':') => (address, None),
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let port = match port {
        Some(p) => p.parse().map_err(|_| invalid("invalid port"))?,
        None => DEFAULT_PORT,
    };
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_address_with_port() {
        let ep = Endpoint::from_address("review.example.com:2222", "bot", "/k").unwrap();
        assert_eq!(ep.host(), "review.example.com");
        assert_eq!(ep.port(), 2222);
        assert_eq!(ep.username(), "bot");
        assert_eq!(ep.key_path(), Path::new("/k"));
    }

    #[test]
    fn test_from_address_defaults_port() {
        let ep = Endpoint::from_address("review.example.com", "bot", "/k").unwrap();
        assert_eq!(ep.port(), DEFAULT_PORT);
        assert_eq!(ep.address(), "review.example.com:29418");
    }

    #[test]
    fn test_from_address_ipv6() {
        let ep = Endpoint::from_address("[::1]:2200", "bot", "/k").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), 2200);
        assert_eq!(ep.address(), "[::1]:2200");

        let bare = Endpoint::from_address("fe80::1", "bot", "/k").unwrap();
        assert_eq!(bare.host(), "fe80::1");
        assert_eq!(bare.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_from_address_rejects_garbage() {
        assert!(matches!(
            Endpoint::from_address(":29418", "bot", "/k"),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::from_address("host:http", "bot", "/k"),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::from_address("[::1", "bot", "/k"),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_with_methods_do_not_touch_other_fields() {
        let ep = Endpoint::new("h", "u", "/k")
            .with_port(1)
            .with_host_key_fingerprint("SHA256:abc");
        assert_eq!(ep.port(), 1);
        assert_eq!(ep.host_key_fingerprint(), Some("SHA256:abc"));
        assert_eq!(ep.host(), "h");
    }
}
