//! Draining a remote command's channel.
//!
//! A session channel delivers stdout, stderr and control messages in the
//! order the server sends them. This module turns that stream into captured
//! bytes or delivered lines plus a final [`ExitStatus`], and decides when the
//! command is finished.
//!
//! The functions are generic over [`MessageSource`] so the same logic drives
//! a real russh channel and the in-memory queues used in tests.

use std::fmt;

use async_trait::async_trait;
use russh::{ChannelMsg, ChannelReadHalf, Sig};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::signal::CancelSignal;

/// SSH extended data type code for stderr.
const STDERR_EXT: u32 = 1;

/// How a remote process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process exited with this code.
    Code(u32),
    /// The process was terminated by a signal.
    Signal { name: String, message: String },
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn code(&self) -> Option<u32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            ExitStatus::Signal { .. } => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit status {code}"),
            ExitStatus::Signal { name, message } if message.is_empty() => {
                write!(f, "killed by signal {name}")
            }
            ExitStatus::Signal { name, message } => {
                write!(f, "killed by signal {name}: {message}")
            }
        }
    }
}

fn signal_name(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{other:?}"),
    }
}

/// Which streams end up in the captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capture {
    Discard,
    Stdout,
    /// Stdout and stderr interleaved in arrival order.
    Combined,
}

/// Anything that yields channel messages until the channel is gone.
#[async_trait]
pub(crate) trait MessageSource: Send {
    async fn next_message(&mut self) -> Option<ChannelMsg>;
}

#[async_trait]
impl MessageSource for ChannelReadHalf {
    async fn next_message(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

/// Tracks the control messages that decide when a command is finished.
///
/// Servers send `ExitStatus` and `Eof` in either order, so the command is
/// complete once both have arrived, or on `Close`.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    status: Option<ExitStatus>,
    eof: bool,
    rejected: bool,
}

impl Completion {
    /// Record `msg`. Returns `true` once nothing more is expected.
    pub(crate) fn observe(&mut self, msg: &ChannelMsg) -> bool {
        match msg {
            ChannelMsg::ExitStatus { exit_status } => {
                self.status = Some(ExitStatus::Code(*exit_status));
                self.eof
            }
            ChannelMsg::ExitSignal {
                signal_name: sig,
                error_message,
                ..
            } => {
                self.status = Some(ExitStatus::Signal {
                    name: signal_name(sig),
                    message: error_message.clone(),
                });
                self.eof
            }
            ChannelMsg::Eof => {
                self.eof = true;
                self.status.is_some()
            }
            ChannelMsg::Close => true,
            // Only the exec request asks for a reply.
            ChannelMsg::Failure => {
                self.rejected = true;
                true
            }
            _ => false,
        }
    }

    /// Turn the observed outcome into a result carrying `output`.
    pub(crate) fn finish(self, output: Vec<u8>) -> Result<Vec<u8>> {
        if self.rejected {
            return Err(Error::ExecRejected);
        }
        match self.status {
            Some(status) if status.success() => Ok(output),
            Some(status) => Err(Error::RemoteExecutionFailed { status, output }),
            None => Err(Error::ExitStatusMissing),
        }
    }
}

/// Drain `source` to completion, keeping the streams selected by `capture`.
pub(crate) async fn collect<S>(source: &mut S, capture: Capture) -> Result<Vec<u8>>
where
    S: MessageSource + ?Sized,
{
    let mut output = Vec::with_capacity(4096);
    let mut completion = Completion::default();

    while let Some(msg) = source.next_message().await {
        match &msg {
            ChannelMsg::Data { data } if capture != Capture::Discard => {
                output.extend_from_slice(data);
            }
            ChannelMsg::ExtendedData { data, ext }
                if *ext == STDERR_EXT && capture == Capture::Combined =>
            {
                output.extend_from_slice(data);
            }
            _ => {}
        }
        if completion.observe(&msg) {
            break;
        }
    }

    completion.finish(output)
}

/// Like [`collect`], but returns the signal's error as soon as it fires.
///
/// With a signal the source is drained on its own task and reports through a
/// oneshot, so a firing signal never waits on a blocked read. The task is
/// aborted when the signal wins.
pub(crate) async fn collect_until<S>(
    mut source: S,
    capture: Capture,
    signal: Option<&CancelSignal>,
) -> Result<Vec<u8>>
where
    S: MessageSource + 'static,
{
    let Some(signal) = signal else {
        return collect(&mut source, capture).await;
    };

    let (tx, rx) = oneshot::channel();
    let drain = tokio::spawn(async move {
        let _ = tx.send(collect(&mut source, capture).await);
    });

    tokio::select! {
        biased;
        err = signal.fired() => {
            drain.abort();
            Err(err)
        }
        done = rx => done.unwrap_or(Err(Error::ExitStatusMissing)),
    }
}

/// Next message from `source`, or the signal's error if it fires first.
///
/// The signal is polled first so an already-fired signal wins even when
/// messages are queued.
pub(crate) async fn next_message<S>(
    source: &mut S,
    signal: Option<&CancelSignal>,
) -> Result<Option<ChannelMsg>>
where
    S: MessageSource + ?Sized,
{
    match signal {
        None => Ok(source.next_message().await),
        Some(signal) => tokio::select! {
            biased;
            err = signal.fired() => Err(err),
            msg = source.next_message() => Ok(msg),
        },
    }
}

/// Drain `source` to completion while honouring `signal`, discarding output.
pub(crate) async fn wait_exit<S>(source: &mut S, signal: Option<&CancelSignal>) -> Result<()>
where
    S: MessageSource + ?Sized,
{
    let mut completion = Completion::default();
    while let Some(msg) = next_message(source, signal).await? {
        if completion.observe(&msg) {
            break;
        }
    }
    completion.finish(Vec::new()).map(|_| ())
}

/// Hand every stdout line to `handler` as it arrives, then report the exit.
///
/// The first handler error stops reading and is returned without waiting
/// for the process to exit.
pub(crate) async fn pipe_lines<S, F, E>(
    source: &mut S,
    signal: Option<&CancelSignal>,
    mut handler: F,
) -> Result<()>
where
    S: MessageSource + ?Sized,
    F: FnMut(&str) -> std::result::Result<(), E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut lines = LineBuffer::default();
    let mut completion = Completion::default();
    let mut deliver = |line: &str| handler(line).map_err(|e| Error::LineHandler(e.into()));

    while let Some(msg) = next_message(source, signal).await? {
        match &msg {
            ChannelMsg::Data { data } => {
                for line in lines.push(data) {
                    deliver(&line)?;
                }
            }
            ChannelMsg::Eof => {
                if let Some(line) = lines.take_partial() {
                    deliver(&line)?;
                }
            }
            _ => {}
        }
        if completion.observe(&msg) {
            break;
        }
    }

    if let Some(line) = lines.take_partial() {
        deliver(&line)?;
    }
    completion.finish(Vec::new()).map(|_| ())
}

/// Splits a byte stream into lines without the `\n` or `\r\n` terminator.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `data` and return every line it completed.
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                lines.push(Self::decode(std::mem::take(&mut self.pending)));
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// The unterminated remainder, if any.
    pub(crate) fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(Self::decode(std::mem::take(&mut self.pending)))
    }

    fn decode(mut line: Vec<u8>) -> String {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}
