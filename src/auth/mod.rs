//! Credential resolution.
//!
//! A [`ConnectionConfig`] can offer up to three credentials. [`resolve`]
//! turns it into exactly one prepared [`AuthProof`], trying them in a fixed
//! order:
//!
//! 1. [`AgentAuth`]: only when the config asks for it and `SSH_AUTH_SOCK`
//!    is set
//! 2. [`KeyAuth`]: when a private key path is configured
//! 3. [`PasswordAuth`]: when a non-empty password is configured
//!
//! A method that fails to prepare (unreachable agent, unreadable key, wrong
//! passphrase) is logged and skipped. When nothing is left the result is
//! [`Error::NoAuthMethod`].
//!
//! # Example
//!
//! ```ignore
//! let config = ConnectionConfig::new("example.com")
//!     .key_path("/home/me/.ssh/id_ed25519")
//!     .password("fallback");
//!
//! let proof = gssh::auth::resolve(&config).await?;
//! assert_eq!(proof.kind(), AuthKind::Key);
//! ```
//!
//! [`Error::NoAuthMethod`]: crate::Error::NoAuthMethod

mod agent;
mod chain;
mod key;
mod password;
mod proof;
mod traits;

pub use agent::{AgentAuth, has_agent};
pub use chain::AuthChain;
pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use proof::{AuthKind, AuthProof};
pub use traits::AuthStrategy;

use crate::config::ConnectionConfig;
use crate::error::Result;

/// Resolve one authentication proof from `config`.
///
/// Key files are read and decrypted on every call, so each connection
/// attempt gets a fresh proof.
pub async fn resolve(config: &ConnectionConfig) -> Result<AuthProof> {
    AuthChain::from_config(config).resolve().await
}
