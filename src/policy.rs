//! Host key verification policies.
//!
//! A [`HostKeyPolicy`] is consulted once per handshake with the dialed alias,
//! the peer's socket address and the key it presented. Returning an error
//! aborts the handshake and the dial fails with that error.
//!
//! | Policy | Unknown host | Known key | Different key |
//! |--------|--------------|-----------|---------------|
//! | [`KnownHostsPolicy`] (default) | refused | accepted | refused |
//! | [`TrustOnFirstUse`] | recorded, accepted | accepted | refused |
//! | [`AcceptAnyHostKey`] | accepted | accepted | accepted |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::PublicKey;
use tracing::{debug, warn};

use crate::config::HostKeyPolicyKind;
use crate::error::{Error, Result};
use crate::known_hosts::{
    HostKeyStatus, KnownHosts, append_known_host, default_known_hosts_path, verify_known_host,
};

/// Decides whether a presented host key is acceptable.
pub trait HostKeyPolicy: Send + Sync {
    fn verify(&self, host: &str, remote: SocketAddr, key: &PublicKey) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> HostKeyPolicy for F
where
    F: Fn(&str, SocketAddr, &PublicKey) -> Result<()> + Send + Sync,
{
    fn verify(&self, host: &str, remote: SocketAddr, key: &PublicKey) -> Result<()> {
        self(host, remote, key)
    }
}

/// Accepts every host key.
///
/// Anyone able to intercept the connection can impersonate the server.
/// Only use this against throwaway hosts or inside trusted networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyHostKey;

impl HostKeyPolicy for AcceptAnyHostKey {
    fn verify(&self, host: &str, remote: SocketAddr, _key: &PublicKey) -> Result<()> {
        debug!(host = %host, remote = %remote, "Accepting host key without verification");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "insecure"
    }
}

/// Accepts only keys already recorded in a known_hosts file.
///
/// The file is read once, when the policy is built.
#[derive(Debug, Clone)]
pub struct KnownHostsPolicy {
    hosts: KnownHosts,
}

impl KnownHostsPolicy {
    pub fn new(hosts: KnownHosts) -> Self {
        Self { hosts }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(KnownHosts::load(path)?))
    }

    /// Policy over `~/.ssh/known_hosts`.
    pub fn from_default() -> Result<Self> {
        Self::load(default_known_hosts_path()?)
    }
}

impl HostKeyPolicy for KnownHostsPolicy {
    fn verify(&self, host: &str, remote: SocketAddr, key: &PublicKey) -> Result<()> {
        match self.hosts.check(host, remote, key) {
            HostKeyStatus::Known => Ok(()),
            HostKeyStatus::Unknown => Err(Error::UnknownHost {
                host: host.to_string(),
            }),
            HostKeyStatus::Mismatch(wanted) => Err(Error::HostKeyMismatch {
                host: host.to_string(),
                wanted,
            }),
            HostKeyStatus::Revoked => Err(Error::HostKeyRevoked {
                host: host.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "strict"
    }
}

/// Records unknown hosts on first contact and verifies them afterwards.
///
/// This widens trust compared to [`KnownHostsPolicy`]: whoever answers the
/// very first connection is believed. A changed key is still refused.
#[derive(Debug, Clone, Default)]
pub struct TrustOnFirstUse {
    path: Option<PathBuf>,
}

impl TrustOnFirstUse {
    /// Use `~/.ssh/known_hosts`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl HostKeyPolicy for TrustOnFirstUse {
    fn verify(&self, host: &str, remote: SocketAddr, key: &PublicKey) -> Result<()> {
        // Blocking file I/O on the handshake task. known_hosts is small and
        // this runs once per dial; block_in_place would panic on a
        // current-thread runtime.
        let path = self.path.as_deref();
        if verify_known_host(path, host, remote, key)? {
            return Ok(());
        }
        warn!(host = %host, remote = %remote, "Trusting unknown host key on first use");
        append_known_host(path, host, remote, key)
    }

    fn name(&self) -> &'static str {
        "tofu"
    }
}

/// Build the policy selected by `kind`, over `known_hosts` or the default file.
pub fn policy_for(
    kind: HostKeyPolicyKind,
    known_hosts: Option<&Path>,
) -> Result<Arc<dyn HostKeyPolicy>> {
    Ok(match kind {
        HostKeyPolicyKind::Strict => match known_hosts {
            Some(path) => Arc::new(KnownHostsPolicy::load(path)?),
            None => Arc::new(KnownHostsPolicy::from_default()?),
        },
        HostKeyPolicyKind::TrustOnFirstUse => match known_hosts {
            Some(path) => Arc::new(TrustOnFirstUse::with_path(path)),
            None => Arc::new(TrustOnFirstUse::new()),
        },
        HostKeyPolicyKind::Insecure => Arc::new(AcceptAnyHostKey),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::known_hosts::fixtures::*;
    use std::fs;

    mod insecure {
        use super::*;

        #[test]
        fn test_accepts_anything() {
            let policy = AcceptAnyHostKey;
            assert!(policy.verify("example.com", addr("192.0.2.1:22"), &key1()).is_ok());
            assert!(policy.verify("", addr("192.0.2.1:22"), &key2()).is_ok());
            assert_eq!(policy.name(), "insecure");
        }
    }

    mod strict {
        use super::*;

        fn policy(content: &str) -> KnownHostsPolicy {
            KnownHostsPolicy::new(KnownHosts::parse("kh", content).unwrap())
        }

        #[test]
        fn test_known_accepted() {
            let p = policy(&format!("example.com {KEY1}\n"));
            assert!(p.verify("example.com:22", addr("192.0.2.1:22"), &key1()).is_ok());
        }

        #[test]
        fn test_unknown_refused() {
            let p = policy("");
            let err = p.verify("example.com", addr("192.0.2.1:22"), &key1()).unwrap_err();
            assert!(matches!(err, Error::UnknownHost { host } if host == "example.com"));
        }

        #[test]
        fn test_mismatch_refused_distinctly() {
            let p = policy(&format!("example.com {KEY1}\n"));
            let err = p.verify("example.com", addr("192.0.2.1:22"), &key2()).unwrap_err();
            assert!(matches!(err, Error::HostKeyMismatch { .. }));
        }

        #[test]
        fn test_revoked_refused() {
            let p = policy(&format!("example.com {KEY1}\n@revoked * {KEY1}\n"));
            let err = p.verify("example.com", addr("192.0.2.1:22"), &key1()).unwrap_err();
            assert!(matches!(err, Error::HostKeyRevoked { .. }));
        }

        #[test]
        fn test_file_read_once() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("known_hosts");
            fs::write(&path, format!("example.com {KEY1}\n")).unwrap();

            let p = KnownHostsPolicy::load(&path).unwrap();
            fs::write(&path, "").unwrap();
            assert!(p.verify("example.com", addr("192.0.2.1:22"), &key1()).is_ok());
        }
    }

    mod trust_on_first_use {
        use super::*;

        #[test]
        fn test_unknown_is_recorded_then_known() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("known_hosts");
            let p = TrustOnFirstUse::with_path(&path);
            let remote = addr("192.0.2.1:22");

            p.verify("example.com:22", remote, &key1()).unwrap();
            assert!(path.exists());
            p.verify("example.com:22", remote, &key1()).unwrap();

            let lines = fs::read_to_string(&path).unwrap();
            assert_eq!(lines.lines().count(), 1);
        }

        #[test]
        fn test_mismatch_refused_and_not_recorded() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("known_hosts");
            let p = TrustOnFirstUse::with_path(&path);
            let remote = addr("192.0.2.1:22");

            p.verify("example.com", remote, &key1()).unwrap();
            let err = p.verify("example.com", remote, &key2()).unwrap_err();
            assert!(matches!(err, Error::HostKeyMismatch { .. }));

            let lines = fs::read_to_string(&path).unwrap();
            assert_eq!(lines.lines().count(), 1);
        }

        #[test]
        fn test_revoked_not_recorded() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("known_hosts");
            fs::write(&path, format!("@revoked * {KEY1}\n")).unwrap();
            let p = TrustOnFirstUse::with_path(&path);

            let err = p.verify("example.com", addr("192.0.2.1:22"), &key1()).unwrap_err();
            assert!(matches!(err, Error::HostKeyRevoked { .. }));
            let lines = fs::read_to_string(&path).unwrap();
            assert_eq!(lines.lines().count(), 1);
        }
    }

    mod closures {
        use super::*;

        #[test]
        fn test_closure_policy() {
            let policy = |host: &str, _remote: SocketAddr, _key: &PublicKey| -> Result<()> {
                if host == "trusted" {
                    Ok(())
                } else {
                    Err(Error::UnknownHost {
                        host: host.to_string(),
                    })
                }
            };
            assert!(policy.verify("trusted", addr("192.0.2.1:22"), &key1()).is_ok());
            assert!(policy.verify("other", addr("192.0.2.1:22"), &key1()).is_err());
            assert_eq!(HostKeyPolicy::name(&policy), "custom");
        }
    }

    mod selection {
        use super::*;

        #[test]
        fn test_policy_for_kinds() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("known_hosts");

            let strict = policy_for(HostKeyPolicyKind::Strict, Some(path.as_path())).unwrap();
            assert_eq!(strict.name(), "strict");
            let tofu = policy_for(HostKeyPolicyKind::TrustOnFirstUse, Some(path.as_path())).unwrap();
            assert_eq!(tofu.name(), "tofu");
            let insecure = policy_for(HostKeyPolicyKind::Insecure, None).unwrap();
            assert_eq!(insecure.name(), "insecure");
        }
    }
}
