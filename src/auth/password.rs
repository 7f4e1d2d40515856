//! Password-based SSH authentication.

use async_trait::async_trait;

use crate::error::Result;

use super::proof::AuthProof;
use super::traits::AuthStrategy;

/// Password authentication strategy.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    /// Create a new password authentication strategy.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn prepare(&self) -> Result<AuthProof> {
        Ok(AuthProof::Password(self.password.clone()))
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
