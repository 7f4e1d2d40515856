//! Cancellation signals for remote commands.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// External signal a command races against.
///
/// When it fires before the remote process exits, the command sends an
/// interrupt to the remote side and returns the signal's error. The remote
/// process may keep running after that; nothing waits for it to stop.
#[derive(Debug, Clone)]
pub enum CancelSignal {
    /// Fires when the token is cancelled.
    Token(CancellationToken),
    /// Fires at `at`; `timeout` is the duration it was built from.
    Deadline { at: Instant, timeout: Duration },
}

impl CancelSignal {
    /// Deadline `timeout` from now.
    pub fn timeout(timeout: Duration) -> Self {
        CancelSignal::Deadline {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn is_fired(&self) -> bool {
        match self {
            CancelSignal::Token(token) => token.is_cancelled(),
            CancelSignal::Deadline { at, .. } => Instant::now() >= *at,
        }
    }

    /// Resolves once the signal fires, yielding the error to report.
    pub async fn fired(&self) -> Error {
        match self {
            CancelSignal::Token(token) => {
                token.cancelled().await;
                Error::Cancelled
            }
            CancelSignal::Deadline { at, timeout } => {
                sleep_until(*at).await;
                Error::DeadlineExceeded(*timeout)
            }
        }
    }
}

impl From<CancellationToken> for CancelSignal {
    fn from(token: CancellationToken) -> Self {
        CancelSignal::Token(token)
    }
}

impl From<Duration> for CancelSignal {
    fn from(timeout: Duration) -> Self {
        CancelSignal::timeout(timeout)
    }
}
