//! Linear backoff with jitter for transient service failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AppResult;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    UpTo(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            jitter: Jitter::UpTo(DEFAULT_MAX_JITTER),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no waiting.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            jitter: Jitter::None,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * attempt + jitter`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt);
        match self.jitter {
            Jitter::None => linear,
            Jitter::UpTo(max) if max.is_zero() => linear,
            Jitter::UpTo(max) => {
                let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                let extra = rand::thread_rng().gen_range(0..=max_millis);
                linear.saturating_add(Duration::from_millis(extra))
            }
        }
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` is spent.
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
///
/// Returns the error from the final attempt.
pub async fn attempt_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {}ms",
                    operation,
                    attempt,
                    max_attempts,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
