//! SSH client library: authenticated connections, remote commands and SFTP
//! file transfers on top of [`russh`].
//!
//! ```ignore
//! use gssh::{Client, ConnectionConfig};
//!
//! let config = ConnectionConfig::new("example.com")
//!     .username("deploy")
//!     .use_agent(true);
//! let mut client = Client::new(config)?;
//! client.dial().await?;
//!
//! let mut cmd = client.command("uname -a").await?;
//! let out = cmd.output().await?;
//!
//! client.upload("./build.tar.gz", "/tmp/build.tar.gz").await?;
//! client.close().await?;
//! ```
//!
//! Host keys are checked against `~/.ssh/known_hosts` by default. See
//! [`policy`] for trust-on-first-use and the insecure opt-out.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod auth;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod known_hosts;
pub mod output;
pub mod policy;
pub mod session;
pub mod sftp;
pub mod signal;

pub use client::{Client, ping};
pub use command::{RemoteCommand, Started};
pub use config::{ConnectionConfig, HostKeyPolicyKind};
pub use error::{Error, Result};
pub use output::ExitStatus;
pub use policy::{AcceptAnyHostKey, HostKeyPolicy, KnownHostsPolicy, TrustOnFirstUse};
pub use signal::CancelSignal;

#[cfg(test)]
pub(crate) mod test_support {
    use std::env;
    use std::sync::Mutex as StdMutex;

    // SAFETY: Tests are serialized via ENV_TEST_MUTEX to prevent data races
    pub(crate) static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// Helper to set an environment variable safely within tests.
    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    pub(crate) unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// Helper to remove an environment variable safely within tests.
    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    pub(crate) unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }
}
