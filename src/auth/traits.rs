//! Authentication strategy trait definition.

use async_trait::async_trait;

use crate::error::Result;

use super::proof::AuthProof;

/// One way of proving identity to an SSH server.
///
/// Preparing a strategy does all the local work (contacting the agent,
/// loading and decrypting a key) before any connection exists. The
/// resulting [`AuthProof`] is presented to the server after the handshake.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Produce a ready-to-use proof, or fail if this method is unusable.
    async fn prepare(&self) -> Result<AuthProof>;

    /// Get the name of this authentication strategy.
    ///
    /// Used for logging and debugging purposes.
    fn name(&self) -> &'static str;
}
