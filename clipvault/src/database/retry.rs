//! Retry helper for SQLite write contention.

use std::future::Future;

use tokio::time::sleep;
use tracing::debug;

use crate::domain::RetryPolicy;
use crate::{Error, Result};

/// Backoff used while another connection holds the write lock.
fn busy_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 8,
        initial_delay_ms: 10,
        max_delay_ms: 1000,
        backoff_multiplier: 2.0,
        use_jitter: true,
    }
}

/// Whether `err` is SQLITE_BUSY / SQLITE_LOCKED.
pub fn is_sqlite_busy(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err
        && matches!(db_err.code().as_deref(), Some("5") | Some("6"))
    {
        return true;
    }

    let msg = sqlx_err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Run a write operation, retrying while SQLite reports the database busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = busy_policy();
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(err) if is_sqlite_busy(&err) && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    policy.max_retries
                );
                sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
