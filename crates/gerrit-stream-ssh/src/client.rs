//! SSH client handler and authentication.

use std::sync::Arc;

use gerrit_stream_core::{ConnectionError, Endpoint};
use russh::{
    client::{self, Handle},
    keys::{
        PrivateKeyWithHashAlg, load_secret_key,
        ssh_key::{HashAlg, PublicKey},
    },
};

/// russh callbacks for one connection.
pub(crate) struct ClientHandler {
    address: String,
    pinned_fingerprint: Option<String>,
}

impl ClientHandler {
    pub(crate) fn new(endpoint: &Endpoint) -> Self {
        Self {
            address: endpoint.address(),
            pinned_fingerprint: endpoint.host_key_fingerprint().map(str::to_owned),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.pinned_fingerprint {
            Some(expected) => {
                let ok = fingerprint_matches(expected, &actual);
                if !ok {
                    tracing::error!(
                        address = %self.address,
                        %expected,
                        %actual,
                        "Server host key does not match pinned fingerprint"
                    );
                }
                Ok(ok)
            }
            None => {
                tracing::warn!(
                    address = %self.address,
                    fingerprint = %actual,
                    "Accepting unpinned server host key"
                );
                Ok(true)
            }
        }
    }
}

/// Compare fingerprints, tolerating a missing `SHA256:` prefix on either.
pub(crate) fn fingerprint_matches(expected: &str, actual: &str) -> bool {
    let strip = |fp: &str| fp.trim().trim_start_matches("SHA256:").to_owned();
    strip(expected) == strip(actual)
}

/// Dial, verify the host key and authenticate with the endpoint's key.
pub(crate) async fn connect(
    endpoint: &Endpoint,
    config: Arc<client::Config>,
) -> Result<Handle<ClientHandler>, ConnectionError> {
    let key = load_secret_key(endpoint.key_path(), None).map_err(|e| ConnectionError::Key {
        path: endpoint.key_path().to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut handle = client::connect(
        config,
        (endpoint.host(), endpoint.port()),
        ClientHandler::new(endpoint),
    )
    .await
    .map_err(|e| dial_error(e, endpoint))?;

    let hash = handle
        .best_supported_rsa_hash()
        .await
        .map_err(|e| ConnectionError::Protocol(e.to_string()))?
        .flatten();

    let auth = handle
        .authenticate_publickey(
            endpoint.username(),
            PrivateKeyWithHashAlg::new(Arc::new(key), hash),
        )
        .await
        .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

    if !auth.success() {
        return Err(ConnectionError::AuthRejected {
            username: endpoint.username().to_owned(),
        });
    }

    tracing::debug!(address = %endpoint.address(), user = endpoint.username(), "Authenticated");
    Ok(handle)
}

pub(crate) fn dial_error(err: russh::Error, endpoint: &Endpoint) -> ConnectionError {
    match err {
        russh::Error::UnknownKey => ConnectionError::HostKey(format!(
            "{} does not match the pinned fingerprint",
            endpoint.address()
        )),
        other => ConnectionError::Dial(format!("{}: {other}", endpoint.address())),
    }
}
