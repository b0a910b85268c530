//! Batch orchestrator and status queries.
//!
//! The owner id is always an explicit argument; nothing here reads request
//! context. Every read is scoped to that owner, so a foreign job id looks
//! exactly like one that never existed.

use std::sync::Arc;
use std::time::Duration;

use expensa_core::batch::{validate_batch, BatchItemRequest, BatchKind, BatchProgress};
use expensa_core::error::CoreError;
use expensa_core::job_store::{page_bounds, BatchJob, JobStore};
use expensa_core::types::DbId;

use crate::item::apply_batch;
use crate::pool::{PoolConfig, WorkerPool};
use crate::runner::{BatchRunner, BatchTask};

const ENTITY: &str = "Batch job";

pub struct BatchOrchestrator {
    runner: Arc<BatchRunner>,
    pool: WorkerPool,
    kind: BatchKind,
}

impl BatchOrchestrator {
    /// Start a worker pool for `kind` batches.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(runner: Arc<BatchRunner>, config: PoolConfig, kind: BatchKind) -> Self {
        let pool = WorkerPool::new(Arc::clone(&runner), config);
        Self { runner, pool, kind }
    }

    fn store(&self) -> &dyn JobStore {
        self.runner.store().as_ref()
    }

    /// Accept a batch for background processing.
    ///
    /// Validates, reserves a queue slot, creates the `pending` job, and
    /// dispatches it. Returns as soon as the job exists; processing happens
    /// on the pool. A full queue rejects the batch before any job is
    /// created.
    pub async fn submit(
        &self,
        owner_id: DbId,
        items: Vec<BatchItemRequest>,
    ) -> Result<BatchJob, CoreError> {
        validate_batch(&items)?;
        let slot = self.pool.reserve()?;

        let total_items = items.len() as i32;
        let job = self
            .store()
            .create(owner_id, self.kind.job_type, total_items)
            .await?;

        slot.dispatch(BatchTask {
            job_id: job.id,
            owner_id,
            kind: self.kind,
            items,
        });

        tracing::info!(
            job_id = job.id,
            user_id = owner_id,
            total_items,
            job_type = self.kind.job_type,
            "Batch job submitted"
        );
        Ok(job)
    }

    /// Apply a batch inline, without a job record or pacing.
    pub async fn apply_now(
        &self,
        owner_id: DbId,
        items: &[BatchItemRequest],
    ) -> Result<BatchProgress, CoreError> {
        validate_batch(items)?;
        let executor = self.runner.executor().as_ref();
        let progress = apply_batch(executor, &self.kind, owner_id, items).await;
        tracing::info!(
            user_id = owner_id,
            total_items = items.len(),
            successful = progress.successful,
            failed = progress.failed,
            "Synchronous batch applied"
        );
        Ok(progress)
    }

    /// Current snapshot of one of the owner's jobs.
    pub async fn status(&self, job_id: DbId, owner_id: DbId) -> Result<BatchJob, CoreError> {
        self.store()
            .find_for_owner(job_id, owner_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: ENTITY,
                id: job_id,
            })
    }

    /// The owner's jobs, newest first.
    pub async fn list(
        &self,
        owner_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<BatchJob>, CoreError> {
        let (limit, offset) = page_bounds(limit, offset);
        Ok(self.store().list_for_owner(owner_id, limit, offset).await?)
    }

    /// Ask the worker holding a job to stop before its next item.
    ///
    /// Returns the snapshot read before cancelling; the terminal
    /// `cancelled` status shows up once the worker has stopped.
    pub async fn cancel(&self, job_id: DbId, owner_id: DbId) -> Result<BatchJob, CoreError> {
        let job = self.status(job_id, owner_id).await?;

        if job.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Batch job {job_id} is already {}",
                job.status
            )));
        }
        if !self.pool.cancel(job_id) {
            return Err(CoreError::Conflict(format!(
                "Batch job {job_id} is not running on this server"
            )));
        }

        tracing::info!(job_id, user_id = owner_id, "Batch job cancellation requested");
        Ok(job)
    }

    /// Whether the job store is reachable.
    pub async fn ping(&self) -> Result<(), CoreError> {
        Ok(self.store().ping().await?)
    }

    /// Stop the worker pool. See [`WorkerPool::shutdown`].
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.pool.shutdown(timeout).await
    }
}
