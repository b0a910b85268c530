//! The background worker: runs one accepted batch to a terminal status.
//!
//! Lifecycle of a run:
//! 1. Checkpoint `processing` with zero counters.
//! 2. For each item, in input order: wait for the rate limiter, apply the
//!    item, record its outcome, checkpoint counters and results together.
//! 3. Checkpoint the terminal status (`failed` iff every item failed,
//!    otherwise `completed`).
//!
//! The cancellation token is checked before every item and while waiting on
//! the rate limiter; a cancelled run checkpoints `cancelled` with the
//! counters reached so far. The item in flight when cancellation arrives is
//! always finished and recorded first.
//!
//! A failed checkpoint is logged and the run carries on with its in-memory
//! progress; the next successful checkpoint brings the store up to date.
//! The exception is a job the store already holds as terminal (cancelled by
//! startup recovery in another process, for instance): the run stops
//! without applying further items and reports the stored status.

use std::sync::Arc;

use expensa_core::batch::{BatchItemRequest, BatchKind, BatchProgress};
use expensa_core::job_store::{Checkpoint, JobStore, StoreError};
use expensa_core::mutation::MutationExecutor;
use expensa_core::status::BatchJobStatus;
use expensa_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::item::apply_item;
use crate::rate_limit::RateLimit;

/// Everything a worker needs to process one job. The items are owned, so
/// later changes to the submitter's copy are never observed.
#[derive(Debug, Clone)]
pub struct BatchTask {
    pub job_id: DbId,
    pub owner_id: DbId,
    pub kind: BatchKind,
    pub items: Vec<BatchItemRequest>,
}

/// The store refused a checkpoint because the job is already terminal.
struct Finalized;

/// Shared collaborators of all batch workers.
pub struct BatchRunner {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn MutationExecutor>,
    rate_limit: Arc<dyn RateLimit>,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn MutationExecutor>,
        rate_limit: Arc<dyn RateLimit>,
    ) -> Self {
        Self {
            store,
            executor,
            rate_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<dyn MutationExecutor> {
        &self.executor
    }

    /// Process `task` until its input is exhausted or `cancel` fires.
    /// Returns the terminal status written for the job.
    pub async fn run(&self, task: BatchTask, cancel: CancellationToken) -> BatchJobStatus {
        let BatchTask {
            job_id,
            owner_id,
            kind,
            items,
        } = task;
        let total_items = items.len() as i32;
        let mut progress = BatchProgress::with_capacity(items.len());

        if cancel.is_cancelled() {
            return self.finish(job_id, owner_id, BatchJobStatus::Cancelled, &progress).await;
        }

        tracing::info!(job_id, user_id = owner_id, total_items, "Batch job started");
        let started = Checkpoint::from_progress(Some(BatchJobStatus::Processing), &progress);
        if let Err(Finalized) = self.save(job_id, &started).await {
            return self.stored_status(job_id, owner_id, &progress).await;
        }

        for (index, item) in items.iter().enumerate() {
            let permitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = self.rate_limit.acquire() => true,
            };
            if !permitted {
                return self.finish(job_id, owner_id, BatchJobStatus::Cancelled, &progress).await;
            }

            let outcome = apply_item(self.executor.as_ref(), &kind, owner_id, index, item).await;
            progress.record(outcome);
            let checkpoint = Checkpoint::from_progress(None, &progress);
            if let Err(Finalized) = self.save(job_id, &checkpoint).await {
                return self.stored_status(job_id, owner_id, &progress).await;
            }
        }

        let status = progress.final_status(total_items);
        self.finish(job_id, owner_id, status, &progress).await
    }

    async fn finish(
        &self,
        job_id: DbId,
        owner_id: DbId,
        status: BatchJobStatus,
        progress: &BatchProgress,
    ) -> BatchJobStatus {
        let terminal = Checkpoint::from_progress(Some(status), progress);
        if let Err(Finalized) = self.save(job_id, &terminal).await {
            return self.stored_status(job_id, owner_id, progress).await;
        }
        tracing::info!(
            job_id,
            %status,
            processed = progress.processed,
            successful = progress.successful,
            failed = progress.failed,
            "Batch job finished"
        );
        status
    }

    /// Stop a run whose job was finalized elsewhere and report the status
    /// the store holds for it.
    async fn stored_status(
        &self,
        job_id: DbId,
        owner_id: DbId,
        progress: &BatchProgress,
    ) -> BatchJobStatus {
        let status = match self.store.find_for_owner(job_id, owner_id).await {
            Ok(Some(job)) => job.status,
            Ok(None) => BatchJobStatus::Cancelled,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to read finalized batch job");
                BatchJobStatus::Cancelled
            }
        };
        tracing::warn!(
            job_id,
            %status,
            processed = progress.processed,
            "Batch job was finalized elsewhere, stopping"
        );
        status
    }

    async fn save(&self, job_id: DbId, checkpoint: &Checkpoint<'_>) -> Result<(), Finalized> {
        match self.store.checkpoint(job_id, checkpoint).await {
            Ok(()) => Ok(()),
            Err(StoreError::Terminal(_)) => Err(Finalized),
            Err(e) => {
                tracing::error!(
                    job_id,
                    processed = checkpoint.processed,
                    error = %e,
                    "Failed to checkpoint batch job"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use expensa_core::batch::{EXPENSE_BATCH_UPDATE, MISSING_ITEM_KEY_MESSAGE};
    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::rate_limit::{TokenBucket, Unthrottled};
    use crate::testing::{expense, item, RecordingStore, ScriptedExecutor};

    const OWNER: DbId = 7;

    struct Harness {
        store: Arc<RecordingStore>,
        executor: Arc<ScriptedExecutor>,
        runner: BatchRunner,
    }

    fn harness(executor: ScriptedExecutor, rate_limit: Arc<dyn RateLimit>) -> Harness {
        let store = Arc::new(RecordingStore::default());
        let executor = Arc::new(executor);
        let runner = BatchRunner::new(store.clone(), executor.clone(), rate_limit);
        Harness {
            store,
            executor,
            runner,
        }
    }

    async fn submit(h: &Harness, items: Vec<BatchItemRequest>) -> BatchTask {
        let job = h
            .store
            .create(OWNER, EXPENSE_BATCH_UPDATE.job_type, items.len() as i32)
            .await
            .unwrap();
        BatchTask {
            job_id: job.id,
            owner_id: OWNER,
            kind: EXPENSE_BATCH_UPDATE,
            items,
        }
    }

    #[tokio::test]
    async fn missing_key_in_the_middle_completes_with_one_failure() {
        let h = harness(ScriptedExecutor::new(), Arc::new(Unthrottled));
        let task = submit(&h, vec![expense(1), item(json!({"amount": 5})), expense(3)]).await;
        let job_id = task.job_id;

        let status = h.runner.run(task, CancellationToken::new()).await;
        assert_eq!(status, BatchJobStatus::Completed);

        let job = h.store.find_for_owner(job_id, OWNER).await.unwrap().unwrap();
        assert_eq!(job.total_items, 3);
        assert_eq!(job.processed_items, 3);
        assert_eq!(job.successful_items, 2);
        assert_eq!(job.failed_items, 1);
        assert_eq!(job.status, BatchJobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.results[1].index, 1);
        assert_eq!(job.results[1].message, MISSING_ITEM_KEY_MESSAGE);
        assert_eq!(h.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn all_items_failing_marks_job_failed() {
        let executor = ScriptedExecutor::new().reject(1).error_on(2);
        let h = harness(executor, Arc::new(Unthrottled));
        let task = submit(&h, vec![expense(1), expense(2)]).await;
        let job_id = task.job_id;

        assert_eq!(
            h.runner.run(task, CancellationToken::new()).await,
            BatchJobStatus::Failed
        );

        let job = h.store.find_for_owner(job_id, OWNER).await.unwrap().unwrap();
        assert_eq!(job.status, BatchJobStatus::Failed);
        assert_eq!(job.failed_items, 2);
        assert_eq!(job.successful_items, 0);
    }

    #[tokio::test]
    async fn every_checkpoint_is_self_consistent() {
        let h = harness(ScriptedExecutor::new().reject(2), Arc::new(Unthrottled));
        let task = submit(&h, vec![expense(1), expense(2), item(json!({})), expense(4)]).await;

        h.runner.run(task, CancellationToken::new()).await;

        let snapshots = h.store.snapshots();
        // processing + one per item + terminal
        assert_eq!(snapshots.len(), 6);
        assert_eq!(snapshots[0].status, Some(BatchJobStatus::Processing));
        assert_eq!(snapshots[0].processed, 0);

        for snap in &snapshots {
            assert_eq!(snap.processed, snap.successful + snap.failed);
            assert_eq!(snap.indices.len(), snap.processed as usize);
            let expected: Vec<usize> = (0..snap.processed as usize).collect();
            assert_eq!(snap.indices, expected);
        }

        let processed: Vec<i32> = snapshots.iter().map(|s| s.processed).collect();
        assert_eq!(processed, vec![0, 1, 2, 3, 4, 4]);
        assert_eq!(snapshots[5].status, Some(BatchJobStatus::Completed));
    }

    #[tokio::test]
    async fn store_failures_do_not_stop_the_run() {
        let h = harness(ScriptedExecutor::new(), Arc::new(Unthrottled));
        let task = submit(&h, vec![expense(1), expense(2)]).await;
        let job_id = task.job_id;
        h.store.fail_checkpoints.store(true, Ordering::SeqCst);

        let status = h.runner.run(task, CancellationToken::new()).await;

        assert_eq!(status, BatchJobStatus::Completed);
        assert_eq!(h.executor.call_count(), 2);
        assert_eq!(h.store.snapshots().len(), 4);
        let job = h.store.find_for_owner(job_id, OWNER).await.unwrap().unwrap();
        assert_eq!(job.status, BatchJobStatus::Pending);
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let h = harness(ScriptedExecutor::new(), Arc::new(Unthrottled));
        let task = submit(&h, vec![expense(1), expense(2)]).await;
        let job_id = task.job_id;
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(h.runner.run(task, cancel).await, BatchJobStatus::Cancelled);

        assert_eq!(h.executor.call_count(), 0);
        let job = h.store.find_for_owner(job_id, OWNER).await.unwrap().unwrap();
        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert_eq!(job.processed_items, 0);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn run_stops_when_job_is_finalized_elsewhere() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            ScriptedExecutor::new().gated(gate.clone()),
            Arc::new(Unthrottled),
        );
        let task = submit(&h, (1..=5).map(expense).collect()).await;
        let job_id = task.job_id;
        let entered = h.executor.entered.clone();

        let run = h.runner.run(task, CancellationToken::new());
        let sweep = async {
            entered.notified().await;
            let swept = h.store.abandon_unfinished().await.unwrap();
            gate.add_permits(5);
            swept
        };
        let (status, swept) = tokio::join!(run, sweep);

        assert_eq!(swept, 1);
        assert_eq!(status, BatchJobStatus::Cancelled);
        assert_eq!(h.executor.call_count(), 1);
        let job = h.store.find_for_owner(job_id, OWNER).await.unwrap().unwrap();
        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert_eq!(job.processed_items, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_on_rate_limit() {
        let h = harness(ScriptedExecutor::new(), Arc::new(TokenBucket::new(1, 1)));
        let task = submit(&h, vec![expense(1), expense(2), expense(3)]).await;
        let job_id = task.job_id;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        assert_eq!(h.runner.run(task, cancel).await, BatchJobStatus::Cancelled);

        let job = h.store.find_for_owner(job_id, OWNER).await.unwrap().unwrap();
        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert_eq!(job.processed_items, 1);
        assert_eq!(job.results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_paces_items() {
        let h = harness(ScriptedExecutor::new(), Arc::new(TokenBucket::new(10, 1)));
        let task = submit(&h, vec![expense(1), expense(2), expense(3)]).await;

        let start = tokio::time::Instant::now();
        h.runner.run(task, CancellationToken::new()).await;

        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
