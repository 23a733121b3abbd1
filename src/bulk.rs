//! Bulk creation of records.
//!
//! [`BulkCreator::bulk_create`] validates a whole batch up front, creates the
//! first record on its own, then fans the rest out through a
//! [`RateLimitedExecutor`], each on its own isolated [`Transport`] unless
//! isolation is turned off. Results come back in input order, or as one
//! error naming every record that failed.

use crate::client::Transport;
use crate::error::BulkError;
use crate::executor::RateLimitedExecutor;
use crate::isolated::IsolatedClientFactory;
use crate::outcome::{BatchOutcome, ItemFailure, TaskResult};
use crate::tracker::{StatsSnapshot, StatsTracker};
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default upper bound on worker slots for a parallel batch.
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Default number of requests allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// How a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOptions {
    /// Create records concurrently after the first one.
    pub parallel: bool,
    /// Worker slots; defaults to `min(16, N - 1)`.
    pub max_workers: Option<usize>,
    /// Requests in flight at once.
    pub max_concurrent: usize,
    /// Give every parallel record its own single-connection transport.
    pub isolate_connections: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            max_workers: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            isolate_connections: true,
        }
    }
}

impl BulkOptions {
    /// Create records one after another.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Set the number of worker slots.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the number of requests in flight at once.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Share the primary transport's pool instead of isolating connections.
    pub fn without_isolation(mut self) -> Self {
        self.isolate_connections = false;
        self
    }

    /// Effective `(workers, concurrent)` for `remaining` parallel records.
    ///
    /// Workers never exceed the number of records; permits never exceed the
    /// number of workers.
    pub fn limits(&self, remaining: usize) -> (usize, usize) {
        let workers = self
            .max_workers
            .unwrap_or(DEFAULT_MAX_WORKERS)
            .clamp(1, remaining.max(1));
        let concurrent = self.max_concurrent.clamp(1, workers);
        (workers, concurrent)
    }
}

/// A validation check that accepts every record.
pub fn accept_all<R>(_record: &R) -> Vec<String> {
    Vec::new()
}

/// Entry point for bulk creation against one primary transport.
#[derive(Debug)]
pub struct BulkCreator {
    transport: Transport,
    last_stats: Mutex<Option<StatsSnapshot>>,
}

impl BulkCreator {
    /// Create a bulk creator on top of `transport`.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            last_stats: Mutex::new(None),
        }
    }

    /// The primary transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Statistics of the most recent batch that reached the network.
    pub fn last_stats(&self) -> Option<StatsSnapshot> {
        self.last_stats.lock().clone()
    }

    /// Create every record and return the results in input order.
    ///
    /// `validate` runs over the whole batch before anything is sent; a single
    /// invalid record rejects the batch with [`BulkError::Validation`].
    /// `create_one` receives the transport it must use for its requests.
    ///
    /// Sequential mode (or a batch of one) stops at the first failure with
    /// [`BulkError::Failed`]. Parallel mode creates the first record alone,
    /// then the rest concurrently; a failure there does not stop other
    /// records, and every failure is reported in [`BulkError::Creation`].
    #[instrument(skip_all, fields(total = records.len(), parallel = options.parallel))]
    pub async fn bulk_create<R, T, E, V, F, Fut>(
        &self,
        records: Vec<R>,
        validate: V,
        create_one: F,
        options: BulkOptions,
    ) -> Result<Vec<T>, BulkError<E>>
    where
        R: Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        V: Fn(&R) -> Vec<String>,
        F: Fn(Transport, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        validate_all(&records, &validate)?;

        if records.len() == 1 || !options.parallel {
            return self.create_sequential(records, &create_one).await;
        }

        self.create_parallel(records, create_one, options).await
    }

    async fn create_sequential<R, T, E, F, Fut>(
        &self,
        records: Vec<R>,
        create_one: &F,
    ) -> Result<Vec<T>, BulkError<E>>
    where
        E: Display,
        F: Fn(Transport, R) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let stats = StatsTracker::new(records.len());
        let mut results = Vec::with_capacity(records.len());

        for (index, record) in records.into_iter().enumerate() {
            let started = Instant::now();
            match create_one(self.transport.clone(), record).await {
                Ok(value) => {
                    stats.record_success(started.elapsed());
                    results.push(value);
                }
                Err(error) => {
                    stats.record_failure();
                    self.finish_stats(&stats);
                    warn!(index, error = %error, "Sequential create failed");
                    return Err(BulkError::Failed { index, error });
                }
            }
        }

        self.finish_stats(&stats);
        Ok(results)
    }

    async fn create_parallel<R, T, E, F, Fut>(
        &self,
        records: Vec<R>,
        create_one: F,
        options: BulkOptions,
    ) -> Result<Vec<T>, BulkError<E>>
    where
        R: Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(Transport, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = records.len();
        let stats = Arc::new(StatsTracker::new(total));
        let mut outcome = BatchOutcome::with_len(total);
        let mut records = records.into_iter();

        // The first record often provisions a container the others depend on,
        // so it runs alone on the primary transport.
        if let Some(first) = records.next() {
            let started = Instant::now();
            match create_one(self.transport.clone(), first).await {
                Ok(value) => {
                    stats.record_success(started.elapsed());
                    outcome.set(0, value);
                }
                Err(error) => {
                    stats.record_failure();
                    self.finish_stats(&stats);
                    warn!(error = %error, "Bootstrap create failed");
                    return Err(BulkError::Failed { index: 0, error });
                }
            }
        }

        let (max_workers, max_concurrent) = options.limits(total - 1);
        debug!(
            remaining = total - 1,
            max_workers,
            max_concurrent,
            isolate_connections = options.isolate_connections,
            "Launching parallel creates"
        );

        let create_one = Arc::new(create_one);
        let factory = options
            .isolate_connections
            .then(|| Arc::new(IsolatedClientFactory::new(&self.transport)));
        let mut executor = RateLimitedExecutor::new(max_workers, max_concurrent);

        let mut completed = executor.map_unordered(
            |(index, record): (usize, R)| {
                create_task(
                    index,
                    record,
                    Arc::clone(&create_one),
                    factory.clone(),
                    self.transport.clone(),
                    Arc::clone(&stats),
                )
            },
            records.enumerate().map(|(i, record)| (i + 1, record)),
        );

        while let Some((position, result)) = completed.next().await {
            match result {
                Ok(task_result) => outcome.record(task_result),
                Err(task_error) => {
                    let index = position + 1;
                    stats.record_failure();
                    warn!(index, error = %task_error, "Create task did not complete");
                    outcome.record(TaskResult::failure(index, format!("Item {index}: {task_error}")));
                }
            }
        }

        drop(completed);
        executor.shutdown().await;
        self.finish_stats(&stats);

        outcome.finish().map_err(|(succeeded, failures)| {
            warn!(succeeded, total, failed = failures.len(), "Bulk create partially failed");
            BulkError::Creation {
                succeeded,
                total,
                failures,
            }
        })
    }

    fn finish_stats(&self, stats: &StatsTracker) {
        let snapshot = stats.snapshot();
        info!(
            created = snapshot.success_count,
            failed = snapshot.failure_count,
            elapsed_ms = u64::try_from(snapshot.elapsed.as_millis()).unwrap_or(u64::MAX),
            "{}",
            snapshot.summary()
        );
        *self.last_stats.lock() = Some(snapshot);
    }
}

/// Create one record inside an executor task.
async fn create_task<R, T, E, F, Fut>(
    index: usize,
    record: R,
    create_one: Arc<F>,
    factory: Option<Arc<IsolatedClientFactory>>,
    shared: Transport,
    stats: Arc<StatsTracker>,
) -> TaskResult<T>
where
    E: Display,
    F: Fn(Transport, R) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();

    let transport = match factory {
        Some(factory) => match factory.make_isolated() {
            Ok(isolated) => isolated,
            Err(e) => {
                stats.record_failure();
                return TaskResult::failure(index, format!("Item {index}: {e}"));
            }
        },
        None => shared,
    };

    // The isolated transport is moved in and dropped with the call.
    match (*create_one)(transport, record).await {
        Ok(value) => {
            stats.record_success(started.elapsed());
            TaskResult::success(index, value)
        }
        Err(error) => {
            stats.record_failure();
            debug!(index, error = %error, "Record create failed");
            TaskResult::failure(index, format!("Item {index}: {error}"))
        }
    }
}

/// Run `validate` over every record and collect every failure.
fn validate_all<R, E, V>(records: &[R], validate: &V) -> Result<(), BulkError<E>>
where
    V: Fn(&R) -> Vec<String>,
{
    let failures: Vec<ItemFailure> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let errors = validate(record);
            (!errors.is_empty())
                .then(|| ItemFailure::new(index, format!("Item {index}: {}", errors.join("; "))))
        })
        .collect();

    if failures.is_empty() {
        return Ok(());
    }

    warn!(
        invalid = failures.len(),
        total = records.len(),
        "Bulk validation failed"
    );
    Err(BulkError::Validation { failures })
}
