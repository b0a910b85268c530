//! Row model for the `batch_jobs` table.

use expensa_core::batch::ItemOutcome;
use expensa_core::job_store::BatchJob;
use expensa_core::status::{BatchJobStatus, StatusId};
use expensa_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `batch_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct BatchJobRow {
    pub id: DbId,
    pub user_id: DbId,
    pub job_type: String,
    pub status_id: StatusId,
    pub total_items: i32,
    pub processed_items: i32,
    pub successful_items: i32,
    pub failed_items: i32,
    pub results: Json<Vec<ItemOutcome>>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<BatchJobRow> for BatchJob {
    type Error = sqlx::Error;

    fn try_from(row: BatchJobRow) -> Result<Self, Self::Error> {
        let status = BatchJobStatus::from_id(row.status_id).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown batch job status id {}", row.status_id).into())
        })?;

        Ok(BatchJob {
            id: row.id,
            owner_id: row.user_id,
            job_type: row.job_type,
            status,
            total_items: row.total_items,
            processed_items: row.processed_items,
            successful_items: row.successful_items,
            failed_items: row.failed_items,
            results: row.results.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn row(status_id: StatusId) -> BatchJobRow {
        let now = Utc::now();
        BatchJobRow {
            id: 1,
            user_id: 2,
            job_type: "expense_batch_update".into(),
            status_id,
            total_items: 1,
            processed_items: 1,
            successful_items: 0,
            failed_items: 1,
            results: Json(vec![ItemOutcome::missing_key(0)]),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn converts_known_status() {
        let job = BatchJob::try_from(row(BatchJobStatus::Failed.id())).unwrap();
        assert_eq!(job.status, BatchJobStatus::Failed);
        assert_eq!(job.owner_id, 2);
        assert_eq!(job.results.len(), 1);
    }

    #[test]
    fn rejects_unknown_status() {
        let err = BatchJob::try_from(row(42)).unwrap_err();
        assert_matches!(err, sqlx::Error::Decode(_));
    }
}
