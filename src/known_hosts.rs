//! OpenSSH `known_hosts` support.
//!
//! Each line in a known_hosts file has the format:
//! ```text
//! [@marker] hostnames keytype base64-key [comment]
//! ```
//!
//! Hostnames can be:
//! - Standard: `example.com` or `[example.com]:2222`
//! - Hashed: `|1|salt|hash` (HMAC-SHA1 of the hostname)
//! - Wildcard: `*.example.com`, `10.0.0.?`
//! - Multiple: `host1,host2,192.0.2.7`
//! - Negated: `*.example.com,!bad.example.com`
//!
//! `@revoked` keys are refused for every host. `@cert-authority` lines are
//! skipped since host certificates are not supported.
//!
//! A host is looked up under the alias the caller dialed. The literal socket
//! address of the peer is only a fallback for an empty or unlisted alias. A
//! different key for a listed name is a mismatch, which is never the same
//! thing as an unknown host.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use russh::keys::{PublicKey, PublicKeyBase64};
use sha1::Sha1;
use tracing::{debug, warn};
use wildmatch::WildMatch;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

const HASHED_PREFIX: &str = "|1|";
const REVOKED_MARKER: &str = "@revoked";
const CERT_AUTHORITY_MARKER: &str = "@cert-authority";

/// A key recorded in a known_hosts file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownKey {
    pub key_type: String,
    /// SSH wire encoding of the public key.
    pub key_data: Vec<u8>,
    pub path: PathBuf,
    pub line: usize,
}

impl KnownKey {
    /// Key data as it appears in the file, e.g. for showing the expected
    /// key in a mismatch report.
    pub fn base64(&self) -> String {
        BASE64.encode(&self.key_data)
    }
}

impl fmt::Display for KnownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} key at {}:{}",
            self.key_type,
            self.path.display(),
            self.line
        )
    }
}

/// Outcome of looking a presented host key up in known_hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// The host is listed with this key.
    Known,
    /// No line applies to the host.
    Unknown,
    /// The host is listed, but only with these other keys.
    Mismatch(Vec<KnownKey>),
    /// The key is marked `@revoked`.
    Revoked,
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Wildcard(WildMatch),
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
}

impl Pattern {
    fn parse(raw: &str) -> std::result::Result<Self, String> {
        if let Some(rest) = raw.strip_prefix(HASHED_PREFIX) {
            let (salt, hash) = rest
                .split_once('|')
                .ok_or_else(|| format!("malformed hashed hostname: {raw}"))?;
            let salt = BASE64
                .decode(salt)
                .map_err(|e| format!("invalid base64 salt: {e}"))?;
            let hash = BASE64
                .decode(hash)
                .map_err(|e| format!("invalid base64 hash: {e}"))?;
            return Ok(Pattern::Hashed { salt, hash });
        }
        if raw.contains('*') || raw.contains('?') {
            return Ok(Pattern::Wildcard(WildMatch::new(raw)));
        }
        Ok(Pattern::Exact(raw.to_string()))
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            Pattern::Exact(pattern) => pattern == host,
            Pattern::Wildcard(pattern) => pattern.matches(host),
            Pattern::Hashed { salt, hash } => {
                let Ok(mut mac) = HmacSha1::new_from_slice(salt) else {
                    return false;
                };
                mac.update(host.as_bytes());
                mac.verify_slice(hash).is_ok()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    patterns: Vec<(bool, Pattern)>,
    key: KnownKey,
}

impl Entry {
    /// A negated pattern that matches excludes the host even if a positive
    /// pattern also matches.
    fn applies_to(&self, host: &str) -> bool {
        let mut matched = false;
        for (negated, pattern) in &self.patterns {
            if pattern.matches(host) {
                if *negated {
                    return false;
                }
                matched = true;
            }
        }
        matched
    }
}

/// Parsed contents of one known_hosts file.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<Entry>,
    revoked: Vec<Vec<u8>>,
}

impl KnownHosts {
    /// Load `path`. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "known_hosts file not found, treating as empty");
                Ok(Self {
                    path: path.to_path_buf(),
                    ..Default::default()
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse known_hosts `content`; `path` is only used in error messages and
    /// in the returned [`KnownKey`]s.
    pub fn parse(path: impl AsRef<Path>, content: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut hosts = Self {
            path: path.clone(),
            ..Default::default()
        };

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = |reason: String| Error::KnownHostsParse {
                path: path.display().to_string(),
                line: line_no,
                reason,
            };

            let mut fields = line.split_whitespace().peekable();
            let marker = fields.next_if(|f| f.starts_with('@'));
            let (Some(hosts_field), Some(key_type), Some(key_b64)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid("expected hostnames, key type and key".to_string()));
            };

            let key_data = BASE64
                .decode(key_b64)
                .map_err(|e| invalid(format!("invalid base64 key data: {e}")))?;

            match marker {
                Some(REVOKED_MARKER) => {
                    hosts.revoked.push(key_data);
                    continue;
                }
                Some(CERT_AUTHORITY_MARKER) => continue,
                Some(other) => return Err(invalid(format!("unknown marker {other}"))),
                None => {}
            }

            let patterns = hosts_field
                .split(',')
                .filter(|p| !p.is_empty())
                .map(|p| match p.strip_prefix('!') {
                    Some(negated) => Pattern::parse(negated).map(|pat| (true, pat)),
                    None => Pattern::parse(p).map(|pat| (false, pat)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(invalid)?;

            hosts.entries.push(Entry {
                patterns,
                key: KnownKey {
                    key_type: key_type.to_string(),
                    key_data,
                    path: path.clone(),
                    line: line_no,
                },
            });
        }

        Ok(hosts)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys listed for one normalized address.
    pub fn keys_for(&self, address: &str) -> Vec<&KnownKey> {
        self.entries
            .iter()
            .filter(|e| e.applies_to(address))
            .map(|e| &e.key)
            .collect()
    }

    /// Look `key` up for the dialed alias `host`.
    ///
    /// The alias decides whenever it is listed. The literal `remote` address
    /// is consulted only when the alias is empty or has no entries; a stale
    /// line for the address never overrides a listed alias.
    pub fn check(&self, host: &str, remote: SocketAddr, key: &PublicKey) -> HostKeyStatus {
        let presented = key.public_key_bytes();
        if self.revoked.iter().any(|k| *k == presented) {
            return HostKeyStatus::Revoked;
        }

        let remote_address = normalize(&remote.to_string());
        if !host.is_empty() {
            let alias = normalize(host);
            let listed = self.keys_for(&alias);
            if !listed.is_empty() {
                if alias != remote_address && !self.lists_key(&remote_address, &presented) {
                    let other = self.keys_for(&remote_address);
                    if !other.is_empty() {
                        warn!(
                            alias = %alias,
                            address = %remote_address,
                            listed = other.len(),
                            "known_hosts lists other keys for the remote address"
                        );
                    }
                }
                return Self::status(&alias, listed, &presented);
            }
        }

        let listed = self.keys_for(&remote_address);
        if listed.is_empty() {
            return HostKeyStatus::Unknown;
        }
        Self::status(&remote_address, listed, &presented)
    }

    fn lists_key(&self, address: &str, presented: &[u8]) -> bool {
        self.keys_for(address).iter().any(|k| k.key_data == presented)
    }

    fn status(address: &str, listed: Vec<&KnownKey>, presented: &[u8]) -> HostKeyStatus {
        if listed.iter().any(|k| k.key_data == presented) {
            debug!(address = %address, "host key matches known_hosts");
            HostKeyStatus::Known
        } else {
            debug!(address = %address, listed = listed.len(), "host key does not match known_hosts");
            HostKeyStatus::Mismatch(listed.into_iter().cloned().collect())
        }
    }
}

/// Like Go's `net.SplitHostPort`: fails on a missing port or an unbracketed
/// IPv6 literal.
fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = address.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

/// Canonical known_hosts form of an address.
///
/// `host:22` and `host` become `host`; other ports become `[host]:port`.
pub fn normalize(address: &str) -> String {
    let (host, port) = split_host_port(address).unwrap_or((address, "22"));
    if port != "22" {
        format!("[{host}]:{port}")
    } else if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        inner.to_string()
    } else {
        host.to_string()
    }
}

/// A known_hosts line (without newline) listing `key` for `addresses`.
pub fn line<S: AsRef<str>>(addresses: &[S], key: &PublicKey) -> String {
    let hosts = addresses
        .iter()
        .map(|a| a.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    format!("{} {} {}", hosts, key.algorithm(), key.public_key_base64())
}

/// `$HOME/.ssh/known_hosts`.
pub fn default_known_hosts_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .ok_or(Error::NoHomeDir)?;
    Ok(PathBuf::from(home).join(".ssh").join("known_hosts"))
}

fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => default_known_hosts_path(),
    }
}

/// Reports whether `host` is listed in known_hosts with `key`.
///
/// Returns `Ok(false)` when the host is not listed or the file does not
/// exist, and an error when it is listed with a different key or the key is
/// revoked. `path` defaults to [`default_known_hosts_path`].
pub fn verify_known_host(
    path: Option<&Path>,
    host: &str,
    remote: SocketAddr,
    key: &PublicKey,
) -> Result<bool> {
    let hosts = KnownHosts::load(resolve_path(path)?)?;
    match hosts.check(host, remote, key) {
        HostKeyStatus::Known => Ok(true),
        HostKeyStatus::Unknown => Ok(false),
        HostKeyStatus::Mismatch(wanted) => Err(Error::HostKeyMismatch {
            host: host.to_string(),
            wanted,
        }),
        HostKeyStatus::Revoked => Err(Error::HostKeyRevoked {
            host: host.to_string(),
        }),
    }
}

/// Append one line recording `key` for both the remote address and `host`.
///
/// The file is created with mode 0600 if absent, along with its parent
/// directory. `path` defaults to [`default_known_hosts_path`].
pub fn append_known_host(
    path: Option<&Path>,
    host: &str,
    remote: SocketAddr,
    key: &PublicKey,
) -> Result<()> {
    let path = resolve_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_private_dir(parent)?;
    }

    let mut addresses = vec![normalize(&remote.to_string())];
    let host = normalize(host);
    if !addresses.contains(&host) {
        addresses.push(host);
    }

    // Do not glue the new record onto an unterminated last line.
    let needs_newline = fs::read(&path)
        .map(|content| content.last().is_some_and(|b| *b != b'\n'))
        .unwrap_or(false);

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&path)?;

    let mut record = String::new();
    if needs_newline {
        record.push('\n');
    }
    record.push_str(&line(&addresses, key));
    record.push('\n');
    file.write_all(record.as_bytes())?;

    debug!(path = %path.display(), addresses = ?addresses, "Appended host key to known_hosts");
    Ok(())
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) const KEY1: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAs5EZIDcGk+pry+Rl5JV+QxUo0Z6UYWhEhjretYtSPL";
    pub(crate) const KEY2: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIKuOsvAOrx5EcED8reoR3lVlmxsv/+IGJgJl2FBufvqY";

    pub(crate) fn key1() -> PublicKey {
        PublicKey::from_openssh(KEY1).unwrap()
    }

    pub(crate) fn key2() -> PublicKey {
        PublicKey::from_openssh(KEY2).unwrap()
    }

    pub(crate) fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }
}
