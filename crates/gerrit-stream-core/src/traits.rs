//! Transport seam.

use async_trait::async_trait;

use crate::{ConnectionError, Endpoint, RemoteSession};

/// Opens authenticated remote command sessions.
///
/// One call, one attempt: implementations do not retry. Retry policy
/// belongs to the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint`, authenticate, and start `command`.
    ///
    /// The returned session streams the command's stdout and owns the
    /// connection exclusively.
    async fn open(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<RemoteSession, ConnectionError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    async fn open(
        &self,
        endpoint: &Endpoint,
        command: &str,
    ) -> Result<RemoteSession, ConnectionError> {
        (**self).open(endpoint, command).await
    }
}
