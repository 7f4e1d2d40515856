//! Private key file SSH authentication.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys;
use tracing::debug;

use crate::error::{Error, Result};

use super::proof::AuthProof;
use super::traits::AuthStrategy;

/// Private key file authentication strategy.
///
/// The key is read and, when a passphrase is set, decrypted each time the
/// strategy is prepared.
pub struct KeyAuth {
    key_path: PathBuf,
    passphrase: Option<String>,
}

impl KeyAuth {
    /// Create a new key authentication strategy for an unencrypted key.
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            passphrase: None,
        }
    }

    /// Decrypt the key with `passphrase`. An empty passphrase means none.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into()).filter(|p: &String| !p.is_empty());
        self
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn prepare(&self) -> Result<AuthProof> {
        debug!(
            path = %self.key_path.display(),
            encrypted = self.passphrase.is_some(),
            "Loading private key"
        );
        let key = keys::load_secret_key(&self.key_path, self.passphrase.as_deref()).map_err(
            |source| Error::KeyLoad {
                path: self.key_path.clone(),
                source,
            },
        )?;
        Ok(AuthProof::Key(Arc::new(key)))
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
