//! Retry helper for per-artifact tool invocations and uploads.

use std::future::Future;

use tokio::time::sleep;
use tracing::debug;

use crate::domain::RetryPolicy;
use crate::Result;

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of retries.
pub async fn retry_transient<T, F, Fut>(op_name: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() || !policy.should_retry(attempt) {
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "Transient failure during {}: {}; retrying in {:?} (retry {}/{})",
                    op_name,
                    err,
                    delay,
                    attempt + 1,
                    policy.max_retries
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Like [`retry_transient`] but retries every error, not only transient ones.
///
/// Used for compensating deletes, which must be attempted as hard as the
/// policy allows.
pub async fn retry_any<T, F, Fut>(op_name: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!("{} failed: {}; retrying in {:?}", op_name, err, delay);
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
