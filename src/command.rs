//! Remote commands.
//!
//! A [`RemoteCommand`] owns one session channel and may run exactly once.
//! Every consuming call (`run`, `output`, `combined_output`, `start`,
//! `output_pipe`) takes the channel out of the command and closes it when
//! done, on success and on error alike. A second consuming call finds no
//! channel and fails with [`Error::NilSession`] without touching the network.
//!
//! # Cancellation
//!
//! A command built with a [`CancelSignal`] races the remote call against the
//! signal. If the signal fires first an `INT` signal is sent to the remote
//! process and the call returns [`Error::Cancelled`] or
//! [`Error::DeadlineExceeded`] straight away. Remote cleanup is best-effort:
//! nothing waits for the process to actually stop.
//!
//! `run`, `output` and `combined_output` spawn one task that drains the
//! channel and reports through a oneshot; `output_pipe` and
//! [`Started::wait`] check the signal inline between messages.

use std::fmt;

use russh::client::Msg;
use russh::{Channel, ChannelReadHalf, ChannelWriteHalf, Sig};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::output::{self, Capture};
use crate::signal::CancelSignal;

/// One prepared remote process.
pub struct RemoteCommand {
    path: String,
    args: Vec<String>,
    channel: Option<Channel<Msg>>,
    signal: Option<CancelSignal>,
}

impl RemoteCommand {
    /// A command with no session attached; see [`set_session`](Self::set_session).
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            channel: None,
            signal: None,
        }
    }

    pub(crate) fn with_channel(channel: Channel<Msg>, path: impl Into<String>) -> Self {
        let mut cmd = Self::new(path);
        cmd.channel = Some(channel);
        cmd
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bind the command to a cancellation signal.
    pub fn with_signal(mut self, signal: impl Into<CancelSignal>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    /// Attach a session channel, replacing any unused one.
    pub fn set_session(&mut self, channel: Channel<Msg>) {
        self.channel = Some(channel);
    }

    /// Whether a consuming call can still run.
    pub fn has_session(&self) -> bool {
        self.channel.is_some()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Request `KEY=value` environment entries for the remote process.
    ///
    /// Entries without `=` or with an empty key are skipped. Servers only
    /// honour variables listed in their `AcceptEnv`, and no reply is
    /// requested, so an entry may silently have no effect.
    pub async fn setenv<I, S>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let channel = self.channel.as_ref().ok_or(Error::NilSession)?;
        for pair in pairs {
            match pair.as_ref().split_once('=') {
                Some((name, value)) if !name.is_empty() => {
                    channel.set_env(false, name, value).await?;
                }
                _ => debug!(entry = pair.as_ref(), "Skipping malformed environment entry"),
            }
        }
        Ok(())
    }

    /// Run to completion, discarding output.
    pub async fn run(&mut self) -> Result<()> {
        self.execute(Capture::Discard).await.map(|_| ())
    }

    /// Run to completion and return stdout.
    ///
    /// A non-zero exit yields [`Error::RemoteExecutionFailed`] carrying the
    /// stdout captured so far.
    pub async fn output(&mut self) -> Result<Vec<u8>> {
        self.execute(Capture::Stdout).await
    }

    /// Run to completion and return stdout and stderr interleaved in
    /// arrival order.
    pub async fn combined_output(&mut self) -> Result<Vec<u8>> {
        self.execute(Capture::Combined).await
    }

    /// Start the process without waiting for it.
    pub async fn start(&mut self) -> Result<Started> {
        let (reader, writer) = self.exec().await?;
        Ok(Started {
            reader,
            writer,
            signal: self.signal.clone(),
        })
    }

    /// Run the process and hand each stdout line to `handler` as it arrives.
    ///
    /// Lines are delivered in order, without their `\n` or `\r\n`. A trailing
    /// line without newline is delivered when the stream ends. The first
    /// handler error stops reading and is returned as
    /// [`Error::LineHandler`] without waiting for the process; otherwise the
    /// process exit is reported once the stream is done.
    pub async fn output_pipe<F, E>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(&str) -> std::result::Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (mut reader, writer) = self.exec().await?;
        let result = output::pipe_lines(&mut reader, self.signal.as_ref(), handler).await;
        if matches!(&result, Err(e) if e.is_cancelled()) {
            interrupt(&writer).await;
        }
        release(&writer).await;
        result
    }

    /// Take the channel and start the process on it.
    async fn exec(&mut self) -> Result<(ChannelReadHalf, ChannelWriteHalf<Msg>)> {
        let channel = self.channel.take().ok_or(Error::NilSession)?;
        let command = self.to_string();
        debug!(command = %command, "Executing remote command");

        if let Err(e) = channel.exec(true, command.as_bytes()).await {
            let _ = channel.close().await;
            return Err(e.into());
        }
        Ok(channel.split())
    }

    async fn execute(&mut self, capture: Capture) -> Result<Vec<u8>> {
        let (reader, writer) = self.exec().await?;

        let result = output::collect_until(reader, capture, self.signal.as_ref()).await;
        if matches!(&result, Err(e) if e.is_cancelled()) {
            interrupt(&writer).await;
        }

        release(&writer).await;
        result
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("has_session", &self.channel.is_some())
            .field("signal", &self.signal)
            .finish()
    }
}

/// A process started with [`RemoteCommand::start`].
///
/// Dropping it without calling [`wait`](Self::wait) abandons the process.
pub struct Started {
    reader: ChannelReadHalf,
    writer: ChannelWriteHalf<Msg>,
    signal: Option<CancelSignal>,
}

impl Started {
    /// Wait for the process to exit, honouring the command's signal.
    pub async fn wait(mut self) -> Result<()> {
        let result = output::wait_exit(&mut self.reader, self.signal.as_ref()).await;
        if matches!(&result, Err(e) if e.is_cancelled()) {
            interrupt(&self.writer).await;
        }
        release(&self.writer).await;
        result
    }

    /// Send `INT` to the remote process.
    pub async fn interrupt(&self) -> Result<()> {
        self.writer.signal(Sig::INT).await?;
        Ok(())
    }
}

async fn interrupt(writer: &ChannelWriteHalf<Msg>) {
    warn!("Signal fired, interrupting remote command");
    if let Err(e) = writer.signal(Sig::INT).await {
        debug!("Failed to send interrupt: {}", e);
    }
}

async fn release(writer: &ChannelWriteHalf<Msg>) {
    if let Err(e) = writer.close().await {
        debug!("Failed to close channel: {}", e);
    }
}
