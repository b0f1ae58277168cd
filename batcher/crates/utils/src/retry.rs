//! Exponential backoff shared by every call site that polls the chain.
//!
//! The operation is invoked with its zero-based attempt number. After a failed attempt `i`
//! the helper sleeps `base_delay * 2^i` before trying again, and gives up after
//! `max_attempts` attempts, returning the last error.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Runs `op` until it succeeds or `max_attempts` attempts have been made.
pub async fn retry_with_backoff<T, E, F, Fut>(max_attempts: usize, base_delay: Duration, op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_if(max_attempts, base_delay, |_| true, op).await
}

/// Same as [`retry_with_backoff`], but stops early when `should_retry` rejects the error.
pub async fn retry_with_backoff_if<T, E, P, F, Fut>(
    max_attempts: usize,
    base_delay: Duration,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) || attempt + 1 >= max_attempts {
                    return Err(err);
                }
                let delay = backoff_delay(base_delay, attempt);
                warn!(attempt, max_attempts, retry_in = ?delay, error = %err, "Operation failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// `base * 2^attempt`, saturating instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}
