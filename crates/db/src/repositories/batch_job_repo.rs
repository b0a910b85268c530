//! Repository for the `batch_jobs` table.
//!
//! Uses `BatchJobStatus` from `expensa_core::status` for every status
//! literal. Each write is a single statement, so a checkpoint is applied
//! atomically.

use expensa_core::job_store::{BatchJob, Checkpoint};
use expensa_core::status::{BatchJobStatus, StatusId};
use expensa_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::batch_job::BatchJobRow;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, user_id, job_type, status_id, \
    total_items, processed_items, successful_items, failed_items, \
    results, created_at, updated_at, completed_at";

fn terminal_ids() -> Vec<StatusId> {
    BatchJobStatus::TERMINAL.iter().map(|s| s.id()).collect()
}

/// Outcome of a checkpoint write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointWrite {
    Applied,
    /// The job exists but is already terminal; nothing was written.
    Terminal,
    Missing,
}

/// Provides persistence operations for batch jobs.
pub struct BatchJobRepo;

impl BatchJobRepo {
    /// Insert a new `pending` job with zero counters, returning the row.
    pub async fn create(
        pool: &PgPool,
        user_id: DbId,
        job_type: &str,
        total_items: i32,
    ) -> Result<BatchJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO batch_jobs (user_id, job_type, status_id, total_items) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, BatchJobRow>(&query)
            .bind(user_id)
            .bind(job_type)
            .bind(BatchJobStatus::Pending.id())
            .bind(total_items)
            .fetch_one(pool)
            .await?;
        BatchJob::try_from(row)
    }

    /// Write counters, results, and optionally a new status in one statement.
    ///
    /// A terminal status also sets `completed_at`. Rows already in a
    /// terminal status are left untouched.
    pub async fn checkpoint(
        pool: &PgPool,
        job_id: DbId,
        checkpoint: &Checkpoint<'_>,
    ) -> Result<CheckpointWrite, sqlx::Error> {
        let status_id: Option<StatusId> = checkpoint.status.map(BatchJobStatus::id);
        let terminal = terminal_ids();

        let result = sqlx::query(
            "UPDATE batch_jobs \
             SET status_id = COALESCE($2, status_id), \
                 processed_items = $3, \
                 successful_items = $4, \
                 failed_items = $5, \
                 results = $6, \
                 completed_at = CASE WHEN $2 = ANY($7) THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id <> ALL($7)",
        )
        .bind(job_id)
        .bind(status_id)
        .bind(checkpoint.processed)
        .bind(checkpoint.successful)
        .bind(checkpoint.failed)
        .bind(Json(checkpoint.results))
        .bind(&terminal)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CheckpointWrite::Applied);
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM batch_jobs WHERE id = $1)",
        )
        .bind(job_id)
        .fetch_one(pool)
        .await?;

        Ok(if exists {
            CheckpointWrite::Terminal
        } else {
            CheckpointWrite::Missing
        })
    }

    /// Find a job by id, scoped to its owner.
    pub async fn find_for_owner(
        pool: &PgPool,
        job_id: DbId,
        user_id: DbId,
    ) -> Result<Option<BatchJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batch_jobs WHERE id = $1 AND user_id = $2");
        sqlx::query_as::<_, BatchJobRow>(&query)
            .bind(job_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .map(BatchJob::try_from)
            .transpose()
    }

    /// List an owner's jobs, newest first.
    pub async fn list_for_owner(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM batch_jobs \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, BatchJobRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(BatchJob::try_from)
            .collect()
    }

    /// Cancel every job still `pending` or `processing`.
    ///
    /// Returns the number of rows affected.
    pub async fn abandon_unfinished(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE batch_jobs \
             SET status_id = $1, completed_at = NOW(), updated_at = NOW() \
             WHERE status_id IN ($2, $3)",
        )
        .bind(BatchJobStatus::Cancelled.id())
        .bind(BatchJobStatus::Pending.id())
        .bind(BatchJobStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
