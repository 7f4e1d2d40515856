//! Whole-file transfers over a remote filesystem.
//!
//! [`RemoteFs`] is the small slice of SFTP this crate needs. The transfer
//! functions are generic over it; [`Client`](crate::Client) drives them
//! with a `russh_sftp` session.

use std::path::Path;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::client::fs::File as SftpFile;
use tokio::fs::File;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;

/// Remote filesystem operations used by the transfer functions.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    /// Open an existing file for reading.
    async fn open(&self, path: &str) -> Result<Self::Reader>;

    /// Create or truncate a file for writing.
    async fn create(&self, path: &str) -> Result<Self::Writer>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// End the session.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl RemoteFs for SftpSession {
    type Reader = SftpFile;
    type Writer = SftpFile;

    async fn open(&self, path: &str) -> Result<SftpFile> {
        Ok(SftpSession::open(self, path).await?)
    }

    async fn create(&self, path: &str) -> Result<SftpFile> {
        Ok(SftpSession::create(self, path).await?)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        Ok(self.remove_file(path).await?)
    }

    async fn close(&self) -> Result<()> {
        Ok(SftpSession::close(self).await?)
    }
}

/// Copy a local file to `remote_path`, returning the number of bytes sent.
///
/// The remote handle is shut down on every path; the first error wins.
pub async fn upload<F>(fs: &F, local_path: impl AsRef<Path>, remote_path: &str) -> Result<u64>
where
    F: RemoteFs + ?Sized,
{
    let local_path = local_path.as_ref();
    let mut local = File::open(local_path).await?;
    let mut remote = fs.create(remote_path).await?;

    let copied = io::copy(&mut local, &mut remote).await;
    let closed = remote.shutdown().await;
    let bytes = copied?;
    closed?;

    debug!(local = %local_path.display(), remote = remote_path, bytes, "Uploaded file");
    Ok(bytes)
}

/// Copy `remote_path` to a local file and sync it to disk.
///
/// The remote file is opened first, so a missing remote file leaves any
/// existing local file untouched.
pub async fn download<F>(fs: &F, remote_path: &str, local_path: impl AsRef<Path>) -> Result<u64>
where
    F: RemoteFs + ?Sized,
{
    let local_path = local_path.as_ref();
    let mut remote = fs.open(remote_path).await?;
    let mut local = File::create(local_path).await?;

    let bytes = io::copy(&mut remote, &mut local).await?;
    local.sync_all().await?;

    debug!(remote = remote_path, local = %local_path.display(), bytes, "Downloaded file");
    Ok(bytes)
}

/// Read a whole remote file into memory.
pub async fn read_file<F>(fs: &F, remote_path: &str) -> Result<Vec<u8>>
where
    F: RemoteFs + ?Sized,
{
    let mut remote = fs.open(remote_path).await?;
    let mut contents = Vec::new();
    remote.read_to_end(&mut contents).await?;
    Ok(contents)
}
