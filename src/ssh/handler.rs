//! Client-side session handler for the underlying SSH engine

use russh::client;
use russh::keys::{HashAlg, PublicKey};
use tracing::debug;

/// Handler for `russh` session events.
///
/// Host key verification is delegated to deployment tooling (known-hosts
/// management happens outside this layer); the handler accepts the
/// presented key and records its fingerprint for the logs.
#[derive(Debug, Default)]
pub struct SshHandler;

impl SshHandler {
    pub fn new() -> Self {
        Self
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            "Server host key fingerprint: {}",
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
