//! Bounded-concurrency execution of per-query fetches.

use crate::error::{Error, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs fetch tasks with at most `max_workers` in flight.
///
/// Clones share one permit pool, so several queues dispatched at the same
/// time still respect a single bound.
#[derive(Debug, Clone)]
pub struct ConcurrentDispatcher {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrentDispatcher {
    /// Create a dispatcher; a bound of zero is treated as one
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Configured bound
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run every task to completion and return each outcome in input order
    pub async fn run_settled<I, F, T>(&self, tasks: I) -> Vec<Result<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        let futures = tasks.into_iter().map(|task| {
            let sem = self.semaphore.clone();
            async move {
                let _permit = sem.acquire().await.map_err(|e| Error::internal(e.to_string()))?;
                task.await
            }
        });

        stream::iter(futures)
            .buffered(self.max_workers)
            .collect::<Vec<_>>()
            .await
    }

    /// Run every task and return all results, or the first error in input order.
    ///
    /// Tasks are never cancelled early; the error is reported once all of them settled.
    pub async fn run<I, F, T>(&self, tasks: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        let outcomes = self.run_settled(tasks).await;
        let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        if failed > 0 {
            log::warn!("{} of {} tasks failed", failed, outcomes.len());
        }
        outcomes.into_iter().collect()
    }
}

impl Default for ConcurrentDispatcher {
    fn default() -> Self {
        Self::new(crate::defaults::MAX_WORKERS)
    }
}
