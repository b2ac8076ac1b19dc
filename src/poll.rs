//! Bounded polling against eventually-consistent services.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{AppError, AppResult, PollError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Builds the timeout message from the configured timeout.
pub type TimeoutMessage<'msg> = &'msg (dyn Fn(Duration) -> String + Send + Sync);

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    cancel: CancelToken,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, CancelToken::never())
    }
}

impl Poller {
    #[must_use]
    pub fn new(interval: Duration, cancel: CancelToken) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        Self { interval, cancel }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Calls `check` until it yields a value or `timeout` elapses.
    ///
    /// The deadline error fires no earlier than `timeout` and no later than
    /// `timeout` plus one interval, assuming `check` itself returns promptly.
    ///
    /// # Errors
    ///
    /// Returns `PollError::TimedOut` (with `on_timeout`'s message when given)
    /// or `PollError::Cancelled` when the token fires.
    pub async fn poll<T, F, Fut>(
        &self,
        mut check: F,
        timeout: Duration,
        on_timeout: Option<TimeoutMessage<'_>>,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let started = Instant::now();
        // An unrepresentable deadline means no deadline.
        let deadline = started.checked_add(timeout);
        let mut cancel = self.cancel.clone();
        let mut attempts: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::poll(PollError::Cancelled));
            }
            attempts = attempts.saturating_add(1);
            if let Some(value) = check().await {
                debug!("Poll satisfied after {} attempt(s)", attempts);
                return Ok(value);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let message = on_timeout.map_or_else(
                    || format!("Poll timed out after {}ms.", timeout.as_millis()),
                    |build| build(timeout),
                );
                debug!("{} ({} attempt(s))", message, attempts);
                return Err(AppError::poll(PollError::TimedOut { message }));
            }

            let pause = deadline.map_or(self.interval, |deadline| {
                self.interval.min(deadline.saturating_duration_since(now))
            });
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => {
                    return Err(AppError::poll(PollError::Cancelled));
                }
            }
        }
    }
}
