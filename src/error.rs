//! Error types for SSH connections, remote commands and file transfers.
//!
//! Every failure in this crate surfaces as a variant of [`Error`]. Nothing is
//! retried internally; callers decide what to do with each outcome.
//!
//! # Classification
//!
//! Errors fall into three broad groups:
//!
//! 1. **Permanent failures**: bad or missing credentials, host key problems
//!    and programmer errors such as consuming a command twice. Retrying the
//!    same call will fail the same way.
//!
//! 2. **Transient failures**: connect timeouts, refused or reset
//!    connections and transport disconnects. [`Error::is_transient`] returns
//!    `true` for these so callers can build their own retry loop.
//!
//! 3. **Remote outcomes**: the remote process ran but exited non-zero or was
//!    killed by a signal. Output captured before the exit is kept in the
//!    error.
//!
//! # Examples
//!
//! ```rust,ignore
//! match cmd.output().await {
//!     Ok(stdout) => println!("{}", String::from_utf8_lossy(&stdout)),
//!     Err(Error::RemoteExecutionFailed { status, output }) => {
//!         eprintln!("{status}, partial output: {} bytes", output.len())
//!     }
//!     Err(e) if e.is_transient() => eprintln!("try again later: {e}"),
//!     Err(e) => return Err(e),
//! }
//! ```

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::known_hosts::KnownKey;
use crate::output::ExitStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("no authentication method available")]
    NoAuthMethod,

    #[error("authentication rejected for user {user} ({method})")]
    AuthenticationRejected { user: String, method: &'static str },

    #[error("unknown host {host}: no matching entry in known_hosts")]
    UnknownHost { host: String },

    #[error("host key mismatch for {host}: known_hosts lists {} other key(s)", .wanted.len())]
    HostKeyMismatch { host: String, wanted: Vec<KnownKey> },

    #[error("host key for {host} is marked @revoked in known_hosts")]
    HostKeyRevoked { host: String },

    #[error("could not start with nil session, use set_session() to set a session")]
    NilSession,

    #[error("client is not connected")]
    NotConnected,

    #[error("client is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("remote command failed: {status}")]
    RemoteExecutionFailed { status: ExitStatus, output: Vec<u8> },

    #[error("remote command exited without reporting an exit status")]
    ExitStatusMissing,

    #[error("remote server refused to execute the command")]
    ExecRejected,

    #[error("line handler failed: {0}")]
    LineHandler(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to load private key from {path}: {source}")]
    KeyLoad {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    #[error("SSH agent error: {0}")]
    Agent(String),

    #[error("invalid known_hosts entry at {path}:{line}: {reason}")]
    KnownHostsParse {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("home directory not found (HOME is not set)")]
    NoHomeDir,

    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// I/O error kinds that indicate a temporary network condition.
const TRANSIENT_IO_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::NotConnected,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::TimedOut,
    io::ErrorKind::WouldBlock,
    io::ErrorKind::Interrupted,
    io::ErrorKind::UnexpectedEof,
];

impl Error {
    /// Reports whether the same call might succeed if repeated later.
    ///
    /// Authentication and host key failures are never transient: retrying
    /// them only risks account lockout or hides a man-in-the-middle.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ConnectTimeout { .. } => true,
            Error::Io(e) => TRANSIENT_IO_KINDS.contains(&e.kind()),
            Error::Ssh(e) => is_transient_ssh(e),
            _ => false,
        }
    }

    /// True when the operation was stopped by its cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded(_))
    }

    /// Exit status of the remote process, if that is what failed.
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        match self {
            Error::RemoteExecutionFailed { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Output captured before the remote process failed.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            Error::RemoteExecutionFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn is_transient_ssh(error: &russh::Error) -> bool {
    match error {
        russh::Error::Disconnect
        | russh::Error::ConnectionTimeout
        | russh::Error::KeepaliveTimeout
        | russh::Error::InactivityTimeout
        | russh::Error::SendError => true,
        russh::Error::IO(e) => TRANSIENT_IO_KINDS.contains(&e.kind()),
        _ => false,
    }
}
