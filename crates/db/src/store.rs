//! Postgres-backed [`JobStore`].

use async_trait::async_trait;
use expensa_core::job_store::{BatchJob, Checkpoint, JobStore, StoreError};
use expensa_core::types::DbId;

use crate::repositories::batch_job_repo::CheckpointWrite;
use crate::repositories::BatchJobRepo;
use crate::DbPool;

/// [`JobStore`] over the `batch_jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        owner_id: DbId,
        job_type: &str,
        total_items: i32,
    ) -> Result<BatchJob, StoreError> {
        BatchJobRepo::create(&self.pool, owner_id, job_type, total_items)
            .await
            .map_err(backend)
    }

    async fn checkpoint(
        &self,
        job_id: DbId,
        checkpoint: &Checkpoint<'_>,
    ) -> Result<(), StoreError> {
        match BatchJobRepo::checkpoint(&self.pool, job_id, checkpoint)
            .await
            .map_err(backend)?
        {
            CheckpointWrite::Applied => Ok(()),
            CheckpointWrite::Terminal => Err(StoreError::Terminal(job_id)),
            CheckpointWrite::Missing => Err(StoreError::NotFound(job_id)),
        }
    }

    async fn find_for_owner(
        &self,
        job_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<BatchJob>, StoreError> {
        BatchJobRepo::find_for_owner(&self.pool, job_id, owner_id)
            .await
            .map_err(backend)
    }

    async fn list_for_owner(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchJob>, StoreError> {
        BatchJobRepo::list_for_owner(&self.pool, owner_id, limit, offset)
            .await
            .map_err(backend)
    }

    async fn abandon_unfinished(&self) -> Result<u64, StoreError> {
        BatchJobRepo::abandon_unfinished(&self.pool)
            .await
            .map_err(backend)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await.map_err(backend)
    }
}
