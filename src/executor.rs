//! Bounded-concurrency task execution.
//!
//! [`RateLimitedExecutor`] runs submitted futures on the tokio runtime behind
//! two independent limits: a pool of `max_workers` worker slots, and
//! `max_concurrent` request permits that bound how many tasks talk to the
//! server at once. Both are held as owned semaphore permits, so they are
//! released on every exit path, panics included.

use crate::error::TaskError;
use futures::FutureExt;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Handle to a submitted task. Resolves to the task's output.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

/// Worker pool gated by a counting semaphore.
///
/// Dropping the executor without calling [`shutdown`](Self::shutdown) aborts
/// every task that has not finished yet.
#[derive(Debug)]
pub struct RateLimitedExecutor {
    workers: Arc<Semaphore>,
    permits: Arc<Semaphore>,
    max_workers: usize,
    max_concurrent: usize,
    tasks: JoinSet<()>,
}

impl RateLimitedExecutor {
    /// Create an executor with `max_workers` worker slots and
    /// `max_concurrent` request permits. Both are raised to at least 1.
    pub fn new(max_workers: usize, max_concurrent: usize) -> Self {
        let max_workers = max_workers.max(1);
        let max_concurrent = max_concurrent.max(1);

        debug!(max_workers, max_concurrent, "Executor started");

        Self {
            workers: Arc::new(Semaphore::new(max_workers)),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_workers,
            max_concurrent,
            tasks: JoinSet::new(),
        }
    }

    /// Number of worker slots.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of request permits.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tasks currently holding a request permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Submit a task. It starts once a worker slot and a request permit are
    /// both free.
    pub fn submit<F, T>(&mut self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let workers = Arc::clone(&self.workers);
        let permits = Arc::clone(&self.permits);

        self.tasks.spawn(async move {
            let result = run_gated(workers, permits, task).await;
            // The handle may have been dropped; the task still ran.
            let _ = tx.send(result);
        });

        TaskHandle { rx }
    }

    /// Run `f` over every item and return the results in input order.
    pub async fn map<I, F, Fut, T>(&mut self, f: F, items: I) -> Vec<Result<T, TaskError>>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = items.into_iter().map(|item| self.submit(f(item))).collect();
        futures::future::join_all(handles).await
    }

    /// Run `f` over every item and yield `(position, result)` pairs as tasks
    /// finish.
    pub fn map_unordered<I, F, Fut, T>(
        &mut self,
        f: F,
        items: I,
    ) -> BoxStream<'static, (usize, Result<T, TaskError>)>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        items
            .into_iter()
            .enumerate()
            .map(|(position, item)| {
                let handle = self.submit(f(item));
                async move { (position, handle.await) }
            })
            .collect::<FuturesUnordered<_>>()
            .boxed()
    }

    /// Wait for every submitted task to finish.
    pub async fn shutdown(mut self) {
        let mut drained = 0usize;
        while let Some(joined) = self.tasks.join_next().await {
            drained += 1;
            if let Err(e) = joined {
                warn!(error = %e, "Executor task did not complete");
            }
        }
        debug!(drained, "Executor drained");
    }
}

async fn run_gated<F, T>(workers: Arc<Semaphore>, permits: Arc<Semaphore>, task: F) -> Result<T, TaskError>
where
    F: Future<Output = T>,
{
    let Ok(_worker) = workers.acquire_owned().await else {
        return Err(TaskError::Cancelled);
    };
    let Ok(_permit) = permits.acquire_owned().await else {
        return Err(TaskError::Cancelled);
    };

    AssertUnwindSafe(task)
        .catch_unwind()
        .await
        .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
