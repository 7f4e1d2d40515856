//! Connection configuration.
//!
//! [`ConnectionConfig`] describes one target host and the credentials offered
//! to it. Each call to [`ConnectionConfig::new`] returns an independent value
//! with built-in defaults; there is no process-wide mutable state.
//!
//! [`ConnectionConfig::from_env`] layers values with a three-tier priority:
//!
//! 1. **Parameter** - Explicitly set on the builder (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GSSH_USER` | root | Login user |
//! | `GSSH_PORT` | 22 | Remote port |
//! | `GSSH_CONNECT_TIMEOUT` | 20s | Connect and handshake timeout in seconds |
//! | `GSSH_COMPRESSION` | true | Enable zlib compression |
//! | `GSSH_PASSWORD` | unset | Password credential |
//! | `GSSH_KEY` | unset | Private key path |
//! | `GSSH_KEY_PASSPHRASE` | unset | Passphrase for the private key |
//! | `GSSH_USE_AGENT` | false | Try the SSH agent first |
//! | `GSSH_HOST_KEY_POLICY` | strict | `strict`, `tofu` or `insecure` |
//! | `GSSH_KNOWN_HOSTS` | `~/.ssh/known_hosts` | known_hosts file override |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use russh::client;

use crate::error::{Error, Result};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default login user
pub const DEFAULT_USERNAME: &str = "root";

/// Default connect timeout in seconds (TCP connect plus SSH handshake)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Keepalive interval sent on idle connections
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Missed keepalives tolerated before the transport is considered dead
const KEEPALIVE_MAX: usize = 3;

pub(crate) const USER_ENV_VAR: &str = "GSSH_USER";
pub(crate) const PORT_ENV_VAR: &str = "GSSH_PORT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "GSSH_CONNECT_TIMEOUT";
pub(crate) const COMPRESSION_ENV_VAR: &str = "GSSH_COMPRESSION";
pub(crate) const PASSWORD_ENV_VAR: &str = "GSSH_PASSWORD";
pub(crate) const KEY_ENV_VAR: &str = "GSSH_KEY";
pub(crate) const KEY_PASSPHRASE_ENV_VAR: &str = "GSSH_KEY_PASSPHRASE";
pub(crate) const USE_AGENT_ENV_VAR: &str = "GSSH_USE_AGENT";
pub(crate) const HOST_KEY_POLICY_ENV_VAR: &str = "GSSH_HOST_KEY_POLICY";
pub(crate) const KNOWN_HOSTS_ENV_VAR: &str = "GSSH_KNOWN_HOSTS";

/// Everything needed to reach and authenticate against one host.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub use_agent: bool,
    pub timeout: Duration,
    pub compression: bool,
    pub known_hosts: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Fresh configuration for `host` with default user, port and timeout.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            password: None,
            key_path: None,
            key_passphrase: None,
            use_agent: false,
            timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            compression: true,
            known_hosts: None,
        }
    }

    /// Parse a `host`, `host:port` or `[v6]:port` target.
    pub fn from_address(address: &str) -> Result<Self> {
        let (host, port) = parse_address(address)?;
        Ok(Self::new(host).port(port))
    }

    /// Configuration for `host` with every unset field taken from the
    /// environment, falling back to the defaults.
    pub fn from_env(host: impl Into<String>) -> Self {
        let mut config = Self::new(host);
        config.username = resolve_username(None);
        config.port = resolve_port(None);
        config.timeout = Duration::from_secs(resolve_connect_timeout(None));
        config.compression = resolve_compression(None);
        config.password = non_empty_env(PASSWORD_ENV_VAR);
        config.key_path = non_empty_env(KEY_ENV_VAR).map(PathBuf::from);
        config.key_passphrase = non_empty_env(KEY_PASSPHRASE_ENV_VAR);
        config.use_agent = resolve_use_agent(None);
        config.known_hosts = non_empty_env(KNOWN_HOSTS_ENV_VAR).map(PathBuf::from);
        config
    }

    /// Server port. Defaults to [`DEFAULT_PORT`].
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Login user. Defaults to [`DEFAULT_USERNAME`].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ConnectionConfig::new("example.com").username("deploy").port(2222);
    /// assert_eq!(config.address(), "example.com:2222");
    /// ```
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Password credential, tried after the agent and the key file.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Private key file to authenticate with.
    ///
    /// # Arguments
    ///
    /// * `path` - OpenSSH or PEM private key, read again on every dial
    ///
    /// Encrypted keys also need [`key_passphrase`](Self::key_passphrase).
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    /// Offer the identities of the agent at `SSH_AUTH_SOCK` first.
    pub fn use_agent(mut self, use_agent: bool) -> Self {
        self.use_agent = use_agent;
        self
    }

    /// Limit on TCP connect plus handshake and authentication.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefer zlib compression when the server offers it.
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Use this known_hosts file instead of `~/.ssh/known_hosts`.
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// `host:port` suitable for `TcpStream::connect`, with IPv6 literals
    /// bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("use_agent", &self.use_agent)
            .field("timeout", &self.timeout)
            .field("compression", &self.compression)
            .field("known_hosts", &self.known_hosts)
            .finish()
    }
}

/// Which host key verification a [`Client`](crate::Client) should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicyKind {
    /// Only keys already present in known_hosts are accepted.
    #[default]
    Strict,
    /// Unknown hosts are recorded and accepted; mismatches are refused.
    TrustOnFirstUse,
    /// Every key is accepted.
    Insecure,
}

impl FromStr for HostKeyPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "tofu" | "trust-on-first-use" => Ok(Self::TrustOnFirstUse),
            "insecure" | "accept-any" => Ok(Self::Insecure),
            other => Err(format!("unknown host key policy: {other}")),
        }
    }
}

/// Build the russh client configuration.
///
/// No inactivity timeout is set: remote commands may legitimately stay
/// silent for a long time. Dead peers are detected through keepalives.
pub fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        preferred,
        ..Default::default()
    })
}

/// Split a target into host and port.
///
/// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. A bare IPv6 literal
/// (more than one colon, no brackets) is taken as a host on the default port.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = |reason: String| Error::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("missing closing bracket".to_string()))?;
        return match tail {
            "" => Ok((host.to_string(), DEFAULT_PORT)),
            _ => {
                let port_str = tail
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("expected ':' after ']'".to_string()))?;
                let port = port_str
                    .parse::<u16>()
                    .map_err(|e| invalid(format!("invalid port number: {e}")))?;
                Ok((host.to_string(), port))
            }
        };
    }

    match address.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Ok((address.to_string(), DEFAULT_PORT)),
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|e| invalid(format!("invalid port number: {e}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Resolve the login user with priority: parameter -> env var -> default
pub(crate) fn resolve_username(username_param: Option<String>) -> String {
    if let Some(username) = username_param {
        return username;
    }

    if let Some(username) = non_empty_env(USER_ENV_VAR) {
        return username;
    }

    DEFAULT_USERNAME.to_string()
}

/// Resolve the port with priority: parameter -> env var -> default
pub(crate) fn resolve_port(port_param: Option<u16>) -> u16 {
    if let Some(port) = port_param {
        return port;
    }

    if let Ok(env_port) = env::var(PORT_ENV_VAR)
        && let Ok(port) = env_port.parse::<u16>()
    {
        return port;
    }

    DEFAULT_PORT
}

/// Resolve the connect timeout (seconds) with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    if let Ok(env_timeout) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return timeout;
    }

    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return parse_flag(&env_compress);
    }

    true
}

/// Resolve agent usage with priority: parameter -> env var -> default (false)
pub(crate) fn resolve_use_agent(agent_param: Option<bool>) -> bool {
    if let Some(use_agent) = agent_param {
        return use_agent;
    }

    if let Ok(env_agent) = env::var(USE_AGENT_ENV_VAR) {
        return parse_flag(&env_agent);
    }

    false
}

/// Resolve the host key policy with priority: parameter -> env var -> default (strict)
///
/// An unrecognised value in the environment falls back to strict.
pub fn resolve_host_key_policy(policy_param: Option<HostKeyPolicyKind>) -> HostKeyPolicyKind {
    if let Some(policy) = policy_param {
        return policy;
    }

    if let Ok(env_policy) = env::var(HOST_KEY_POLICY_ENV_VAR)
        && let Ok(policy) = env_policy.parse::<HostKeyPolicyKind>()
    {
        return policy;
    }

    HostKeyPolicyKind::Strict
}
