//! Authentication chain for trying multiple strategies.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

use super::proof::AuthProof;
use super::traits::AuthStrategy;
use super::{AgentAuth, KeyAuth, PasswordAuth, has_agent};

/// Authentication chain that tries multiple strategies in order.
///
/// Strategies are tried in the order they were added. The first one that
/// prepares successfully wins; later ones are not touched.
///
/// # Example
///
/// ```ignore
/// let proof = AuthChain::new()
///     .with_agent()
///     .with_key("/path/to/key")
///     .with_password("secret")
///     .resolve()
///     .await?;
/// ```
pub struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    /// Create a new empty authentication chain.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Chain for `config` in the fixed order agent, key, password.
    ///
    /// The agent is only included when requested and advertised in the
    /// environment. An empty password does not count as configured.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        let mut chain = Self::new();
        if config.use_agent && has_agent() {
            chain = chain.with_agent();
        }
        if let Some(path) = &config.key_path {
            chain = match &config.key_passphrase {
                Some(passphrase) => chain.with_encrypted_key(path, passphrase),
                None => chain.with_key(path),
            };
        }
        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            chain = chain.with_password(password);
        }
        chain
    }

    /// Add SSH agent authentication to the chain.
    pub fn with_agent(self) -> Self {
        self.with(AgentAuth::new())
    }

    /// Add key-based authentication to the chain.
    pub fn with_key(self, key_path: impl Into<PathBuf>) -> Self {
        self.with(KeyAuth::new(key_path))
    }

    /// Add authentication with a passphrase-protected key to the chain.
    pub fn with_encrypted_key(
        self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.with(KeyAuth::new(key_path).with_passphrase(passphrase))
    }

    /// Add password authentication to the chain.
    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.with(PasswordAuth::new(password))
    }

    /// Add any strategy to the chain.
    pub fn with(mut self, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Check if the chain has any authentication strategies.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Get the number of strategies in the chain.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Names of the strategies, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Prepare the first usable strategy.
    pub async fn resolve(&self) -> Result<AuthProof> {
        for strategy in &self.strategies {
            debug!("Trying authentication strategy: {}", strategy.name());

            match strategy.prepare().await {
                Ok(proof) => {
                    debug!("Resolved credentials with strategy: {}", strategy.name());
                    return Ok(proof);
                }
                Err(e) => {
                    warn!(
                        "Authentication strategy {} unusable, falling through: {}",
                        strategy.name(),
                        e
                    );
                }
            }
        }

        Err(Error::NoAuthMethod)
    }
}

impl Default for AuthChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthKind;
    use crate::auth::agent::AUTH_SOCK_ENV_VAR;
    use crate::auth::key::fixtures::*;
    use crate::test_support::{ENV_TEST_MUTEX, remove_env, set_env};
    use std::env;
    use std::fs;

    fn write_key(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("id_ed25519");
        fs::write(&path, content).unwrap();
        path
    }

    mod building {
        use super::*;

        #[test]
        fn test_auth_chain_empty() {
            let chain = AuthChain::new();
            assert!(chain.is_empty());
            assert_eq!(chain.len(), 0);
        }

        #[test]
        fn test_auth_chain_fluent_api_preserves_order() {
            let chain = AuthChain::new()
                .with_password("pass1")
                .with_key("/key1")
                .with_agent()
                .with_encrypted_key("/key2", "pp");
            assert_eq!(chain.names(), vec!["password", "key", "agent", "key"]);
        }

        #[test]
        fn test_auth_chain_is_send_sync() {
            fn assert_send_sync<T: Send + Sync>() {}
            assert_send_sync::<AuthChain>();
        }

        #[test]
        fn test_from_config_order() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            let saved = env::var_os(AUTH_SOCK_ENV_VAR);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(AUTH_SOCK_ENV_VAR, "/tmp/agent.sock");
            }
            let config = ConnectionConfig::new("h")
                .use_agent(true)
                .key_path("/k")
                .password("pw");
            let chain = AuthChain::from_config(&config);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(AUTH_SOCK_ENV_VAR);
                if let Some(saved) = saved {
                    env::set_var(AUTH_SOCK_ENV_VAR, saved);
                }
            }
            assert_eq!(chain.names(), vec!["agent", "key", "password"]);
        }

        #[test]
        fn test_from_config_skips_agent_without_socket() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            let saved = env::var_os(AUTH_SOCK_ENV_VAR);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(AUTH_SOCK_ENV_VAR);
            }
            let config = ConnectionConfig::new("h").use_agent(true).password("pw");
            let chain = AuthChain::from_config(&config);
            if let Some(saved) = saved {
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe { env::set_var(AUTH_SOCK_ENV_VAR, saved) };
            }
            assert_eq!(chain.names(), vec!["password"]);
        }

        #[test]
        fn test_from_config_skips_agent_when_not_requested() {
            let config = ConnectionConfig::new("h").password("pw");
            assert_eq!(AuthChain::from_config(&config).names(), vec!["password"]);
        }

        #[test]
        fn test_from_config_ignores_empty_password() {
            let config = ConnectionConfig::new("h").password("");
            assert!(AuthChain::from_config(&config).is_empty());
        }
    }

    mod resolving {
        use super::*;

        #[tokio::test]
        async fn test_nothing_configured_is_no_auth_method() {
            let config = ConnectionConfig::new("h");
            let err = AuthChain::from_config(&config).resolve().await.unwrap_err();
            assert!(matches!(err, Error::NoAuthMethod));
        }

        #[tokio::test]
        async fn test_key_wins_over_password() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_key(&dir, PLAIN_KEY);
            let config = ConnectionConfig::new("h").key_path(&path).password("pw");

            let proof = crate::auth::resolve(&config).await.unwrap();
            assert_eq!(proof.kind(), AuthKind::Key);
        }

        #[tokio::test]
        async fn test_bad_key_falls_through_to_password() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_key(&dir, "not a key");
            let config = ConnectionConfig::new("h").key_path(&path).password("pw");

            let proof = crate::auth::resolve(&config).await.unwrap();
            assert_eq!(proof.kind(), AuthKind::Password);
        }

        #[tokio::test]
        async fn test_wrong_passphrase_falls_through() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_key(&dir, ENCRYPTED_KEY);
            let config = ConnectionConfig::new("h")
                .key_path(&path)
                .key_passphrase("wrong")
                .password("pw");

            let proof = crate::auth::resolve(&config).await.unwrap();
            assert_eq!(proof.kind(), AuthKind::Password);
        }

        #[tokio::test]
        async fn test_encrypted_key_with_passphrase() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_key(&dir, ENCRYPTED_KEY);
            let config = ConnectionConfig::new("h")
                .key_path(&path)
                .key_passphrase(ENCRYPTED_KEY_PASSPHRASE);

            let proof = crate::auth::resolve(&config).await.unwrap();
            assert_eq!(proof.kind(), AuthKind::Key);
        }

        #[tokio::test]
        async fn test_bad_key_without_fallback_is_no_auth_method() {
            let dir = tempfile::tempdir().unwrap();
            let config = ConnectionConfig::new("h").key_path(dir.path().join("absent"));

            let err = crate::auth::resolve(&config).await.unwrap_err();
            assert!(matches!(err, Error::NoAuthMethod));
        }

        #[tokio::test]
        async fn test_unreachable_agent_falls_through_to_key() {
            let dir = tempfile::tempdir().unwrap();
            let key = write_key(&dir, PLAIN_KEY);
            let sock = dir.path().join("agent.sock");

            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            let saved = env::var_os(AUTH_SOCK_ENV_VAR);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(AUTH_SOCK_ENV_VAR, sock.to_str().unwrap());
            }
            let config = ConnectionConfig::new("h").use_agent(true).key_path(&key);
            let result = crate::auth::resolve(&config).await;
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(AUTH_SOCK_ENV_VAR);
                if let Some(saved) = saved {
                    env::set_var(AUTH_SOCK_ENV_VAR, saved);
                }
            }
            assert_eq!(result.unwrap().kind(), AuthKind::Key);
        }

        #[tokio::test]
        async fn test_each_resolve_is_fresh() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_key(&dir, PLAIN_KEY);
            let config = ConnectionConfig::new("h").key_path(&path);

            assert_eq!(crate::auth::resolve(&config).await.unwrap().kind(), AuthKind::Key);
            fs::remove_file(&path).unwrap();
            assert!(crate::auth::resolve(&config).await.is_err());
        }
    }
}
