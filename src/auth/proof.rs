//! Prepared credentials.

use std::fmt;
use std::sync::Arc;

use russh::{AgentAuthError, client};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::ClientHandler;

/// Which kind of credential a proof carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Agent,
    Key,
    Password,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Agent => "agent",
            AuthKind::Key => "key",
            AuthKind::Password => "password",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one prepared authentication method.
pub enum AuthProof {
    /// A live agent connection and the identities it offered.
    Agent {
        agent: AgentClient<UnixStream>,
        identities: Vec<PublicKey>,
    },
    /// A decrypted private key.
    Key(Arc<PrivateKey>),
    Password(String),
}

impl AuthProof {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthProof::Agent { .. } => AuthKind::Agent,
            AuthProof::Key(_) => AuthKind::Key,
            AuthProof::Password(_) => AuthKind::Password,
        }
    }

    /// Present the proof to the server as `username`.
    ///
    /// Returns `Ok(false)` when the server rejects it. Agent proofs try every
    /// identity until one is accepted; a lost connection or agent socket ends
    /// the attempt with an error instead.
    pub(crate) async fn authenticate(
        self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool> {
        match self {
            AuthProof::Password(password) => {
                let result = handle.authenticate_password(username, password).await?;
                Ok(result.success())
            }
            AuthProof::Key(key) => {
                // For RSA keys, use the best supported hash algorithm
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

                let key_with_hash = PrivateKeyWithHashAlg::new(key, hash_alg);
                let result = handle
                    .authenticate_publickey(username, key_with_hash)
                    .await?;
                Ok(result.success())
            }
            AuthProof::Agent {
                mut agent,
                identities,
            } => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();

                for identity in identities {
                    debug!("Trying SSH agent identity: {:?}", identity.comment());
                    match handle
                        .authenticate_publickey_with(username, identity, hash_alg, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => return Ok(true),
                        Ok(_) => debug!("Agent identity not accepted, trying next..."),
                        Err(e) => match agent_failure(e) {
                            Some(fatal) => return Err(fatal),
                            None => debug!("Agent refused to sign, trying next..."),
                        },
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Agent errors that no other identity can get past.
fn agent_failure(error: AgentAuthError) -> Option<Error> {
    match error {
        AgentAuthError::Send(_) => Some(Error::Ssh(russh::Error::SendError)),
        AgentAuthError::Key(russh::keys::Error::IO(e)) => {
            Some(Error::Agent(format!("agent connection failed: {e}")))
        }
        AgentAuthError::Key(e) => {
            debug!("Agent authentication error: {}", e);
            None
        }
    }
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProof::Agent { identities, .. } => f
                .debug_struct("Agent")
                .field("identities", &identities.len())
                .finish(),
            AuthProof::Key(key) => f
                .debug_tuple("Key")
                .field(&key.algorithm().to_string())
                .finish(),
            AuthProof::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(AuthKind::Agent.to_string(), "agent");
        assert_eq!(AuthKind::Key.to_string(), "key");
        assert_eq!(AuthKind::Password.as_str(), "password");
    }

    #[test]
    fn test_password_proof_kind() {
        let proof = AuthProof::Password("secret".to_string());
        assert_eq!(proof.kind(), AuthKind::Password);
    }

    #[test]
    fn test_debug_hides_password() {
        let proof = AuthProof::Password("secret".to_string());
        let debug = format!("{:?}", proof);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_lost_connection_stops_agent_loop() {
        let err = agent_failure(AgentAuthError::Send(russh::SendError {})).unwrap();
        assert!(matches!(err, Error::Ssh(russh::Error::SendError)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_agent_socket_failure_stops_agent_loop() {
        let io = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let err = agent_failure(AgentAuthError::Key(russh::keys::Error::IO(io))).unwrap();
        assert!(matches!(err, Error::Agent(_)));
    }

    #[test]
    fn test_refused_signature_tries_next_identity() {
        assert!(agent_failure(AgentAuthError::Key(russh::keys::Error::AgentFailure)).is_none());
    }

    #[test]
    fn test_proof_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AuthProof>();
    }
}
