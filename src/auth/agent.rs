//! SSH agent authentication.

use std::env;

use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use tracing::debug;

use crate::error::{Error, Result};

use super::proof::AuthProof;
use super::traits::AuthStrategy;

/// Environment variable holding the agent socket path.
pub(crate) const AUTH_SOCK_ENV_VAR: &str = "SSH_AUTH_SOCK";

/// Reports whether an agent socket is advertised in the environment.
pub fn has_agent() -> bool {
    env::var_os(AUTH_SOCK_ENV_VAR).is_some_and(|sock| !sock.is_empty())
}

/// SSH agent authentication strategy.
///
/// Connects to the agent behind `SSH_AUTH_SOCK` and collects its
/// identities. An agent holding no identities is treated as unusable.
#[derive(Debug, Default)]
pub struct AgentAuth;

impl AgentAuth {
    /// Create a new SSH agent authentication strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn prepare(&self) -> Result<AuthProof> {
        if !has_agent() {
            return Err(Error::Agent(format!("{AUTH_SOCK_ENV_VAR} is not set")));
        }

        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| Error::Agent(format!("failed to connect to SSH agent: {e}")))?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| Error::Agent(format!("failed to get identities from SSH agent: {e}")))?;

        if identities.is_empty() {
            return Err(Error::Agent("no identities found in SSH agent".to_string()));
        }
        debug!(count = identities.len(), "SSH agent offered identities");

        Ok(AuthProof::Agent { agent, identities })
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}
