//! Test doubles shared by the worker unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use expensa_core::batch::BatchItemRequest;
use expensa_core::job_store::{BatchJob, Checkpoint, JobStore, MemoryJobStore, StoreError};
use expensa_core::mutation::{MutationError, MutationExecutor, MutationOutcome};
use expensa_core::status::BatchJobStatus;
use expensa_core::types::DbId;
use serde_json::{json, Map, Value};
use tokio::sync::{Notify, Semaphore};

pub fn item(value: Value) -> BatchItemRequest {
    BatchItemRequest::from(value)
}

pub fn expense(id: i64) -> BatchItemRequest {
    item(json!({"expenseId": id, "amount": 10}))
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Succeeds for every key except those registered as rejected or erroring.
///
/// With a gate, each call waits for a permit, which lets tests hold a worker
/// mid-item.
#[derive(Default)]
pub struct ScriptedExecutor {
    rejected: HashSet<i64>,
    erroring: HashSet<i64>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
    pub calls: Mutex<Vec<Map<String, Value>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(mut self, key: i64) -> Self {
        self.rejected.insert(key);
        self
    }

    pub fn error_on(mut self, key: i64) -> Self {
        self.erroring.insert(key);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MutationExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<MutationOutcome, MutationError> {
        self.calls.lock().unwrap().push(payload.clone());
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        let key = payload.get("expenseId").and_then(Value::as_i64).unwrap_or(0);
        if self.erroring.contains(&key) {
            return Err(MutationError::Execution("connection reset".into()));
        }
        if self.rejected.contains(&key) {
            return Ok(MutationOutcome::failure("Expense not found"));
        }
        Ok(MutationOutcome::success("Expense updated"))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// What one checkpoint carried.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: Option<BatchJobStatus>,
    pub processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub indices: Vec<usize>,
}

/// [`MemoryJobStore`] that also records every checkpoint and can be told to
/// fail them.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryJobStore,
    pub checkpoints: Mutex<Vec<Snapshot>>,
    pub fail_checkpoints: std::sync::atomic::AtomicBool,
}

impl RecordingStore {
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.checkpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(
        &self,
        owner_id: DbId,
        job_type: &str,
        total_items: i32,
    ) -> Result<BatchJob, StoreError> {
        self.inner.create(owner_id, job_type, total_items).await
    }

    async fn checkpoint(
        &self,
        job_id: DbId,
        checkpoint: &Checkpoint<'_>,
    ) -> Result<(), StoreError> {
        self.checkpoints.lock().unwrap().push(Snapshot {
            status: checkpoint.status,
            processed: checkpoint.processed,
            successful: checkpoint.successful,
            failed: checkpoint.failed,
            indices: checkpoint.results.iter().map(|r| r.index).collect(),
        });
        if self
            .fail_checkpoints
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StoreError::Backend("connection refused".into()));
        }
        self.inner.checkpoint(job_id, checkpoint).await
    }

    async fn find_for_owner(
        &self,
        job_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<BatchJob>, StoreError> {
        self.inner.find_for_owner(job_id, owner_id).await
    }

    async fn list_for_owner(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchJob>, StoreError> {
        self.inner.list_for_owner(owner_id, limit, offset).await
    }

    async fn abandon_unfinished(&self) -> Result<u64, StoreError> {
        self.inner.abandon_unfinished().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
