//! russh client handler.
//!
//! The handler carries what host key verification needs: the alias the
//! caller dialed, the peer address of the TCP stream and the policy to
//! consult. A policy error is returned from the handshake unchanged, so
//! `Client::dial` fails with e.g. [`Error::HostKeyMismatch`] rather than a
//! generic protocol error.
//!
//! [`Error::HostKeyMismatch`]: crate::Error::HostKeyMismatch

use std::net::SocketAddr;
use std::sync::Arc;

use russh::{client, keys};
use tracing::debug;

use crate::error::Error;
use crate::policy::HostKeyPolicy;

/// Client handler for russh that defers host key decisions to a policy.
pub struct ClientHandler {
    host: String,
    remote: SocketAddr,
    policy: Arc<dyn HostKeyPolicy>,
}

impl ClientHandler {
    pub(crate) fn new(
        host: impl Into<String>,
        remote: SocketAddr,
        policy: Arc<dyn HostKeyPolicy>,
    ) -> Self {
        Self {
            host: host.into(),
            remote,
            policy,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            remote = %self.remote,
            policy = self.policy.name(),
            "Verifying server host key"
        );
        self.policy
            .verify(&self.host, self.remote, server_public_key)?;
        Ok(true)
    }
}
