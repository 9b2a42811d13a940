//! Deadline and cancellation for one locator operation

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{Error, Result};

/// Pause between two attempts
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared interruption state of a locator operation
///
/// The operation token is a child of the caller's signal; a timer cancels
/// it when the deadline passes. Child contexts (one per race branch) are
/// cancelled with their parent.
pub(crate) struct RetryContext {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    deadline: Option<Instant>,
    timeout: u64,
    _timer: Option<DropGuard>,
}

impl RetryContext {
    /// `timeout` in milliseconds; 0 never expires
    pub(crate) fn new(timeout: u64, signal: Option<&CancellationToken>) -> Self {
        let token = signal.map(CancellationToken::child_token).unwrap_or_default();
        let timed_out = Arc::new(AtomicBool::new(false));
        if timeout == 0 {
            return Self {
                token,
                timed_out,
                deadline: None,
                timeout,
                _timer: None,
            };
        }

        let deadline = Instant::now() + Duration::from_millis(timeout);
        let stop = CancellationToken::new();
        tokio::spawn({
            let token = token.clone();
            let stop = stop.clone();
            let timed_out = timed_out.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = stop.cancelled() => {}
                    _ = token.cancelled() => {}
                }
            }
        });

        Self {
            token,
            timed_out,
            deadline: Some(deadline),
            timeout,
            _timer: Some(stop.drop_guard()),
        }
    }

    /// Context cancelled together with this one, sharing its deadline
    pub(crate) fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            timed_out: self.timed_out.clone(),
            deadline: self.deadline,
            timeout: self.timeout,
            _timer: None,
        }
    }

    /// Cancel this context and its children
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Guard cancelling this context when dropped
    pub(crate) fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Milliseconds left before the deadline, 0 when there is none
    pub(crate) fn remaining_ms(&self) -> u64 {
        match self.deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now()).as_millis();
                u64::try_from(left).unwrap_or(u64::MAX).max(1)
            }
            None => 0,
        }
    }

    fn interruption_error(&self) -> Error {
        if self.timed_out.load(Ordering::SeqCst) {
            Error::timeout(format!("Timed out after waiting {}ms", self.timeout))
        } else {
            Error::Cancelled
        }
    }

    /// Error ending the operation, if it has been interrupted
    pub(crate) fn interruption(&self) -> Option<Error> {
        self.token.is_cancelled().then(|| self.interruption_error())
    }

    /// Run `future` unless the operation is interrupted first
    pub(crate) async fn guard<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.interruption_error()),
            result = future => result,
        }
    }

    /// Wait out the retry delay
    pub(crate) async fn pause(&self) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(RETRY_DELAY).await;
            Ok(())
        })
        .await
    }
}
