//! Exponential backoff for retryable failures.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for one operation.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    /// 1s, 2s, 4s, then give up.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

/// Run `op` until it succeeds, fails non-retryably, or exhausts the
/// schedule. Only errors the taxonomy marks retryable wait and go again;
/// validation and auth failures surface immediately so their own
/// handling (nothing, or a token refresh) can run instead.
pub async fn retry_with_backoff<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                tokio::time::sleep(delay).await;
                delay *= policy.multiplier;
            }
            Err(err) => return Err(err),
        }
    }
}
