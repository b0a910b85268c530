//! The job store seam: durable batch job records keyed by job id.
//!
//! [`JobStore`] is implemented by the Postgres store in `expensa-db` and by
//! [`MemoryJobStore`] for tests and database-less local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::batch::{BatchProgress, ItemOutcome};
use crate::error::CoreError;
use crate::status::BatchJobStatus;
use crate::types::{DbId, Timestamp};

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// Clamp optional `limit` / `offset` query values into a valid page.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One durable record per accepted batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    #[serde(rename = "jobId")]
    pub id: DbId,
    #[serde(rename = "userId")]
    pub owner_id: DbId,
    pub job_type: String,
    pub status: BatchJobStatus,
    pub total_items: i32,
    pub processed_items: i32,
    pub successful_items: i32,
    pub failed_items: i32,
    pub results: Vec<ItemOutcome>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// A single atomic progress write.
///
/// `status: None` leaves the stored status unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint<'a> {
    pub status: Option<BatchJobStatus>,
    pub processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub results: &'a [ItemOutcome],
}

impl<'a> Checkpoint<'a> {
    pub fn from_progress(status: Option<BatchJobStatus>, progress: &'a BatchProgress) -> Self {
        Self {
            status,
            processed: progress.processed,
            successful: progress.successful,
            failed: progress.failed,
            results: &progress.results,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Batch job {0} not found")]
    NotFound(DbId),

    #[error("Batch job {0} is already in a terminal state")]
    Terminal(DbId),

    #[error("Job store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoreError::NotFound {
                entity: "Batch job",
                id,
            },
            StoreError::Terminal(id) => {
                CoreError::Conflict(format!("Batch job {id} is already finished"))
            }
            StoreError::Backend(msg) => CoreError::Internal(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable storage for batch job records.
///
/// Every write is atomic: readers never observe counters, status, and
/// results from different checkpoints.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `pending` job with zero counters and empty results.
    async fn create(
        &self,
        owner_id: DbId,
        job_type: &str,
        total_items: i32,
    ) -> Result<BatchJob, StoreError>;

    /// Apply one progress write. Entering a terminal status also stamps
    /// `completed_at`. Jobs already in a terminal status are never written.
    async fn checkpoint(&self, job_id: DbId, checkpoint: &Checkpoint<'_>)
        -> Result<(), StoreError>;

    /// Fetch a job only if it belongs to `owner_id`.
    async fn find_for_owner(
        &self,
        job_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<BatchJob>, StoreError>;

    /// List an owner's jobs, newest first.
    async fn list_for_owner(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchJob>, StoreError>;

    /// Mark every `pending` or `processing` job `cancelled`.
    ///
    /// Run at startup: any such job belongs to a worker of a previous
    /// process and will never progress again.
    async fn abandon_unfinished(&self) -> Result<u64, StoreError>;

    /// Cheap liveness check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-process [`JobStore`] backed by a `RwLock<HashMap>`.
///
/// Each write happens under the write lock, so checkpoints are atomic with
/// respect to readers. Nothing survives a restart.
#[derive(Debug)]
pub struct MemoryJobStore {
    next_id: AtomicI64,
    jobs: RwLock<HashMap<DbId, BatchJob>>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of job records held.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        owner_id: DbId,
        job_type: &str,
        total_items: i32,
    ) -> Result<BatchJob, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let job = BatchJob {
            id,
            owner_id,
            job_type: job_type.to_string(),
            status: BatchJobStatus::Pending,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.jobs.write().await.insert(id, job.clone());
        Ok(job)
    }

    async fn checkpoint(
        &self,
        job_id: DbId,
        checkpoint: &Checkpoint<'_>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;

        if job.status.is_terminal() {
            return Err(StoreError::Terminal(job_id));
        }

        let now = Utc::now();
        if let Some(status) = checkpoint.status {
            job.status = status;
            if status.is_terminal() {
                job.completed_at = Some(now);
            }
        }
        job.processed_items = checkpoint.processed;
        job.successful_items = checkpoint.successful;
        job.failed_items = checkpoint.failed;
        job.results = checkpoint.results.to_vec();
        job.updated_at = now;
        Ok(())
    }

    async fn find_for_owner(
        &self,
        job_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<BatchJob>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(&job_id)
            .filter(|job| job.owner_id == owner_id)
            .cloned())
    }

    async fn list_for_owner(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<BatchJob> = jobs
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(owned
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn abandon_unfinished(&self) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut abandoned = 0;
        for job in jobs.values_mut().filter(|job| !job.status.is_terminal()) {
            job.status = BatchJobStatus::Cancelled;
            job.completed_at = Some(now);
            job.updated_at = now;
            abandoned += 1;
        }
        Ok(abandoned)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
