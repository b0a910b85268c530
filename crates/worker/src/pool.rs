//! Bounded pool of batch workers.
//!
//! A fixed number of consumer tasks drain one bounded queue. Submitters
//! first [`reserve`](WorkerPool::reserve) a queue slot, do whatever must
//! happen before the batch is accepted (creating the job record), and then
//! [`dispatch`](QueueSlot::dispatch) into the slot, which cannot fail.
//!
//! Every dispatched job gets a cancellation token that is a child of the
//! pool's shutdown token, so shutting the pool down also stops running
//! jobs. Jobs still queued at shutdown are dropped untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use expensa_core::error::CoreError;
use expensa_core::types::DbId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::runner::{BatchRunner, BatchTask};

/// Default number of consumer tasks.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of accepted-but-not-started batches.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Batch queue is full")]
    QueueFull,

    #[error("Batch workers are shut down")]
    Closed,
}

impl From<PoolError> for CoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::QueueFull => {
                CoreError::Unavailable("Batch queue is full, try again later".into())
            }
            PoolError::Closed => CoreError::Unavailable("Batch workers are shutting down".into()),
        }
    }
}

struct QueuedBatch {
    task: BatchTask,
    cancel: CancellationToken,
}

/// Cancellation tokens of jobs dispatched to this pool and not yet finished.
#[derive(Default)]
struct Registry(Mutex<HashMap<DbId, CancellationToken>>);

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<DbId, CancellationToken>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<QueuedBatch>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Spawn `config.workers` consumer tasks on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if `workers` or `queue_capacity` is 0.
    pub fn new(runner: Arc<BatchRunner>, config: PoolConfig) -> Self {
        assert!(config.workers > 0, "workers must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let registry = Arc::new(Registry::default());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        for worker_id in 0..config.workers {
            tracker.spawn(consume(
                worker_id,
                Arc::clone(&receiver),
                Arc::clone(&runner),
                Arc::clone(&registry),
                shutdown.clone(),
            ));
        }
        tracker.close();

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Batch worker pool started"
        );

        Self {
            sender,
            registry,
            shutdown,
            tracker,
        }
    }

    /// Reserve room in the queue without waiting.
    pub fn reserve(&self) -> Result<QueueSlot<'_>, PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let permit = self.sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => PoolError::Closed,
        })?;
        Ok(QueueSlot { permit, pool: self })
    }

    /// Request cancellation of a job dispatched to this pool.
    ///
    /// Returns `false` if the job is unknown here (never dispatched by this
    /// process, or already finished).
    pub fn cancel(&self, job_id: DbId) -> bool {
        match self.registry.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of dispatched jobs that have not finished yet.
    pub fn active_jobs(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting work, cancel running jobs, and wait up to `timeout`
    /// for the workers to record their final state.
    ///
    /// Returns `true` if every worker stopped in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        tracing::info!(active_jobs = self.active_jobs(), "Shutting down batch worker pool");
        self.shutdown.cancel();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("All batch workers have stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Batch workers did not stop before the shutdown timeout"
                );
                false
            }
        }
    }
}

/// A reserved place in the queue. Dropping it releases the place.
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, QueuedBatch>,
    pool: &'a WorkerPool,
}

impl std::fmt::Debug for QueueSlot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSlot").finish_non_exhaustive()
    }
}

impl QueueSlot<'_> {
    /// Hand `task` to the workers. Cancellation is registered before the
    /// task becomes visible to any worker.
    pub fn dispatch(self, task: BatchTask) {
        let cancel = self.pool.shutdown.child_token();
        self.pool
            .registry
            .lock()
            .insert(task.job_id, cancel.clone());
        self.permit.send(QueuedBatch { task, cancel });
    }
}

async fn consume(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedBatch>>>,
    runner: Arc<BatchRunner>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "Batch worker started");

    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                batch = receiver.recv() => batch,
            }
        };
        let Some(QueuedBatch { task, cancel }) = next else {
            break;
        };

        let job_id = task.job_id;
        tracing::debug!(worker_id, job_id, "Batch worker picked up job");
        runner.run(task, cancel).await;
        registry.lock().remove(&job_id);
    }

    tracing::debug!(worker_id, "Batch worker stopped");
}
