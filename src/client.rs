//! Connection lifecycle.
//!
//! A [`Client`] moves through `Unconnected -> Connected -> Closed`. Once
//! closed it stays closed: every later operation fails with
//! [`Error::Closed`]. All sessions, commands and SFTP transfers are
//! multiplexed over the one SSH connection the client owns.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use russh::client::{self, Msg};
use russh::{Channel, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthKind};
use crate::command::RemoteCommand;
use crate::config::{ConnectionConfig, HostKeyPolicyKind, build_client_config};
use crate::error::{Error, Result};
use crate::policy::{AcceptAnyHostKey, HostKeyPolicy, TrustOnFirstUse, policy_for};
use crate::session::ClientHandler;
use crate::sftp::{self, RemoteFs};
use crate::signal::CancelSignal;

/// An established, authenticated SSH connection.
struct Connection {
    handle: client::Handle<ClientHandler>,
    auth_kind: AuthKind,
    remote: SocketAddr,
}

impl Connection {
    async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

enum State {
    Unconnected,
    Connected(Connection),
    Closed,
}

/// SSH client for one remote host.
///
/// # Example
///
/// ```ignore
/// let config = ConnectionConfig::new("example.com").key_path("/home/me/.ssh/id_ed25519");
/// let mut client = Client::new(config)?;
/// client.dial().await?;
/// let out = client.output("echo Hello, world!").await?;
/// client.close().await?;
/// ```
pub struct Client {
    config: ConnectionConfig,
    policy: Arc<dyn HostKeyPolicy>,
    state: State,
    sftp: Option<SftpSession>,
}

impl Client {
    /// Client that only accepts hosts already in known_hosts.
    ///
    /// Uses `config.known_hosts` when set, `~/.ssh/known_hosts` otherwise.
    /// The file is read here, once.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let policy = policy_for(HostKeyPolicyKind::Strict, config.known_hosts.as_deref())?;
        Ok(Self::with_policy(config, policy))
    }

    /// Client that verifies host keys with a caller-supplied `policy`.
    ///
    /// # Arguments
    ///
    /// * `config` - Target host, credentials and timeouts
    /// * `policy` - Consulted once per dial with the alias, the peer address
    ///   and the presented key
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let policy = policy_for(HostKeyPolicyKind::Tofu, None)?;
    /// let mut client = Client::with_policy(ConnectionConfig::new("example.com"), policy);
    /// client.dial().await?;
    /// ```
    pub fn with_policy(config: ConnectionConfig, policy: Arc<dyn HostKeyPolicy>) -> Self {
        Self {
            config,
            policy,
            state: State::Unconnected,
            sftp: None,
        }
    }

    /// Client that accepts any host key. See [`AcceptAnyHostKey`].
    pub fn insecure(config: ConnectionConfig) -> Self {
        Self::with_policy(config, Arc::new(AcceptAnyHostKey))
    }

    /// Client that records unknown hosts on first contact. See [`TrustOnFirstUse`].
    pub fn trust_on_first_use(config: ConnectionConfig) -> Self {
        let policy = match &config.known_hosts {
            Some(path) => TrustOnFirstUse::with_path(path),
            None => TrustOnFirstUse::new(),
        };
        Self::with_policy(config, Arc::new(policy))
    }

    /// Replace the policy used by the next dial.
    pub fn set_host_key_policy(&mut self, policy: Arc<dyn HostKeyPolicy>) {
        self.policy = policy;
    }

    /// The configuration every dial resolves credentials from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect, verify the host key and authenticate.
    ///
    /// Credentials are resolved afresh on every call. An existing connection
    /// is disconnected first. On failure nothing is left open and the client
    /// is unconnected.
    pub async fn dial(&mut self) -> Result<()> {
        if matches!(self.state, State::Closed) {
            return Err(Error::Closed);
        }
        self.drop_connection().await;

        let proof = auth::resolve(&self.config).await?;
        let auth_kind = proof.kind();
        let addr = self.config.address();
        let timeout = self.config.timeout;

        debug!(
            addr = %addr,
            user = %self.config.username,
            auth = %auth_kind,
            policy = self.policy.name(),
            "Dialing"
        );

        let connect = async {
            let stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
            let remote = stream.peer_addr()?;
            let handler = ClientHandler::new(addr.clone(), remote, Arc::clone(&self.policy));
            let config = build_client_config(self.config.compression);
            let handle = client::connect_stream(config, stream, handler).await?;
            Ok::<_, Error>((handle, remote))
        };

        let (mut handle, remote) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout {
                addr: addr.clone(),
                timeout,
            })??;

        match proof.authenticate(&mut handle, &self.config.username).await {
            Ok(true) => {}
            Ok(false) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(Error::AuthenticationRejected {
                    user: self.config.username.clone(),
                    method: auth_kind.as_str(),
                });
            }
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(e);
            }
        }

        info!(
            addr = %addr,
            remote = %remote,
            user = %self.config.username,
            auth = %auth_kind,
            "Connected"
        );
        self.state = State::Connected(Connection {
            handle,
            auth_kind,
            remote,
        });
        Ok(())
    }

    /// Same as [`dial`](Self::dial).
    pub async fn ping(&mut self) -> Result<()> {
        self.dial().await
    }

    pub fn is_connected(&self) -> bool {
        matches!(&self.state, State::Connected(conn) if !conn.handle.is_closed())
    }

    /// Peer address of the current connection.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            State::Connected(conn) => Some(conn.remote),
            _ => None,
        }
    }

    /// Which credential authenticated the current connection.
    pub fn auth_kind(&self) -> Option<AuthKind> {
        match &self.state {
            State::Connected(conn) => Some(conn.auth_kind),
            _ => None,
        }
    }

    fn connection(&self) -> Result<&Connection> {
        match &self.state {
            State::Connected(conn) => Ok(conn),
            State::Unconnected => Err(Error::NotConnected),
            State::Closed => Err(Error::Closed),
        }
    }

    /// Open a new session channel on the connection.
    pub async fn new_session(&self) -> Result<Channel<Msg>> {
        let conn = self.connection()?;
        let channel = conn.handle.channel_open_session().await?;
        debug!(channel = ?channel.id(), "Opened session channel");
        Ok(channel)
    }

    /// A command bound to a fresh session.
    ///
    /// `name` is passed to the remote shell as is, so it may already carry
    /// arguments.
    pub async fn command(&self, name: impl Into<String>) -> Result<RemoteCommand> {
        let channel = self.new_session().await?;
        Ok(RemoteCommand::with_channel(channel, name))
    }

    /// A command bound to a fresh session and to `signal`.
    pub async fn command_with_signal(
        &self,
        signal: impl Into<CancelSignal>,
        name: impl Into<String>,
    ) -> Result<RemoteCommand> {
        Ok(self.command(name).await?.with_signal(signal))
    }

    /// Run `cmd` and return its stdout.
    pub async fn output(&self, cmd: &str) -> Result<Vec<u8>> {
        self.command(cmd).await?.output().await
    }

    /// Run `cmd` and return stdout and stderr interleaved.
    pub async fn combined_output(&self, cmd: &str) -> Result<Vec<u8>> {
        self.command(cmd).await?.combined_output().await
    }

    pub async fn combined_output_with_signal(
        &self,
        signal: impl Into<CancelSignal>,
        cmd: &str,
    ) -> Result<Vec<u8>> {
        self.command_with_signal(signal, cmd)
            .await?
            .combined_output()
            .await
    }

    /// Start an SFTP session on a new channel.
    pub async fn new_sftp(&self) -> Result<SftpSession> {
        let channel = self.new_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(SftpSession::new(channel.into_stream()).await?)
    }

    /// Cache `session` for the transfer methods, closing any previous one.
    ///
    /// Without a cached session each transfer opens and closes its own.
    pub async fn set_sftp(&mut self, session: SftpSession) {
        if let Some(old) = self.sftp.replace(session) {
            release_sftp(&old).await;
        }
    }

    /// Upload a local file, returning the number of bytes written.
    pub async fn upload(&self, local_path: impl AsRef<Path>, remote_path: &str) -> Result<u64> {
        if let Some(fs) = &self.sftp {
            return sftp::upload(fs, local_path, remote_path).await;
        }
        let fs = self.new_sftp().await?;
        let result = sftp::upload(&fs, local_path, remote_path).await;
        release_sftp(&fs).await;
        result
    }

    /// Download a remote file, returning the number of bytes written.
    pub async fn download(&self, remote_path: &str, local_path: impl AsRef<Path>) -> Result<u64> {
        if let Some(fs) = &self.sftp {
            return sftp::download(fs, remote_path, local_path).await;
        }
        let fs = self.new_sftp().await?;
        let result = sftp::download(&fs, remote_path, local_path).await;
        release_sftp(&fs).await;
        result
    }

    /// Read a whole remote file into memory.
    ///
    /// Uses the cached SFTP session when there is one, otherwise a
    /// short-lived session that is closed before returning.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let hostname = client.read_file("/etc/hostname").await?;
    /// ```
    pub async fn read_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        if let Some(fs) = &self.sftp {
            return sftp::read_file(fs, remote_path).await;
        }
        let fs = self.new_sftp().await?;
        let result = sftp::read_file(&fs, remote_path).await;
        release_sftp(&fs).await;
        result
    }

    /// Delete a remote file.
    pub async fn remove_file(&self, remote_path: &str) -> Result<()> {
        if let Some(fs) = &self.sftp {
            return fs.remove(remote_path).await;
        }
        let fs = self.new_sftp().await?;
        let result = fs.remove(remote_path).await;
        release_sftp(&fs).await;
        result
    }

    /// Disconnect and move to the closed state. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(fs) = self.sftp.take() {
            release_sftp(&fs).await;
        }
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(conn) => {
                info!(addr = %self.config.address(), "Closing connection");
                conn.disconnect().await
            }
            State::Unconnected | State::Closed => Ok(()),
        }
    }

    /// Tear down the current connection, if any, ahead of a re-dial.
    async fn drop_connection(&mut self) {
        if let Some(fs) = self.sftp.take() {
            release_sftp(&fs).await;
        }
        if let State::Connected(conn) = std::mem::replace(&mut self.state, State::Unconnected) {
            debug!(remote = %conn.remote, "Disconnecting previous connection");
            if let Err(e) = conn.disconnect().await {
                warn!("Error during disconnect: {}", e);
            }
        }
    }
}

/// Check that `config` can connect and authenticate, then disconnect.
///
/// The host key is not verified: this is a reachability and credentials
/// check, never a trust decision.
///
/// # Examples
///
/// ```ignore
/// gssh::ping(ConnectionConfig::new("example.com").password("secret")).await?;
/// ```
pub async fn ping(config: ConnectionConfig) -> Result<()> {
    let mut client = Client::insecure(config);
    client.dial().await?;
    client.close().await
}

async fn release_sftp(fs: &SftpSession) {
    if let Err(e) = RemoteFs::close(fs).await {
        debug!("Failed to close SFTP session: {}", e);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Unconnected => "unconnected",
            State::Connected(_) => "connected",
            State::Closed => "closed",
        };
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("policy", &self.policy.name())
            .field("state", &state)
            .finish()
    }
}
