//! Reusable retry policy for bounded-wait polling.
//!
//! The sandbox readiness probe (and anything else that needs to wait for an
//! external system) polls through a `RetryPolicy` instead of a hand-rolled
//! sleep loop. The wait is deadline-aware and cancellable, so a worker
//! blocked on a slow sandbox can be reclaimed.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a polled wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The probe succeeded within the deadline.
    Ready(T),
    /// The overall timeout elapsed without a successful probe.
    TimedOut { waited: Duration },
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Fixed-interval polling policy with an overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Poll `probe` until it returns `Some(value)`, the deadline passes, or
    /// `cancel` fires. The probe runs at least once even with a zero
    /// timeout, so an already-satisfied condition is never reported as a
    /// timeout.
    pub async fn wait_until<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> WaitOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;

        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            if let Some(value) = probe().await {
                return WaitOutcome::Ready(value);
            }

            if Instant::now() + self.interval > deadline {
                return WaitOutcome::TimedOut {
                    waited: start.elapsed(),
                };
            }

            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
