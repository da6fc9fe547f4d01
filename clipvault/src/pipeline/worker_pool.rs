//! Bounded scatter/gather for the fan-out stages.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::{Error, Result};

/// Runs one stage's work items with at most `max_workers` in flight.
///
/// Every call awaits all of its tasks before returning. Dropping the returned
/// future aborts the tasks still running, which in turn kills their child
/// processes.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `work` on every item and return the results in input order.
    ///
    /// A panicking task is reported as an error for its item; the others are
    /// unaffected.
    pub async fn scatter<T, R, F, Fut>(&self, stage: &'static str, items: Vec<T>, work: F) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        let mut tasks = JoinSet::new();
        let mut task_index = std::collections::HashMap::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            let semaphore = self.semaphore.clone();
            let fut = work(item);
            let handle = tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("worker pool closed".to_string()))?;
                fut.await
            });
            task_index.insert(handle.id(), index);
        }

        debug!(stage, total, max_workers = self.max_workers, "Scattered work items");

        let mut results: Vec<Option<Result<R>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(&index) = task_index.get(&id) {
                        results[index] = Some(result);
                    }
                }
                Err(join_error) => {
                    error!(stage, error = %join_error, "Worker task failed");
                    if let Some(&index) = task_index.get(&join_error.id()) {
                        results[index] = Some(Err(Error::Other(format!(
                            "{stage} worker failed: {join_error}"
                        ))));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::Other(format!("{stage} worker vanished")))))
            .collect()
    }
}
