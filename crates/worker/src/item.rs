//! Applying a single batch item through the mutation executor.

use expensa_core::batch::{BatchItemRequest, BatchKind, BatchProgress, ItemOutcome};
use expensa_core::mutation::MutationExecutor;
use expensa_core::types::DbId;

/// Apply one item and describe what happened.
///
/// Never fails: a missing key, an executor error, and a `success: false`
/// outcome all become a failed [`ItemOutcome`]. Items without a key never
/// reach the executor.
pub async fn apply_item(
    executor: &dyn MutationExecutor,
    kind: &BatchKind,
    owner_id: DbId,
    index: usize,
    item: &BatchItemRequest,
) -> ItemOutcome {
    let Some(payload) = item.to_payload(kind, owner_id) else {
        return ItemOutcome::missing_key(index);
    };
    let key = payload.get(kind.key_field).cloned().unwrap_or_default();

    match executor.execute(kind.operation, &payload).await {
        Ok(outcome) if outcome.success => ItemOutcome::succeeded(index, key),
        Ok(outcome) => {
            let message = outcome.failure_message();
            tracing::warn!(
                user_id = owner_id,
                index,
                item_key = %key,
                reason = %message,
                "Batch item rejected"
            );
            ItemOutcome::failed(index, Some(key), message)
        }
        Err(e) => {
            tracing::warn!(
                user_id = owner_id,
                index,
                item_key = %key,
                error = %e,
                "Batch item failed"
            );
            ItemOutcome::failed(index, Some(key), e.to_string())
        }
    }
}

/// Apply a whole batch inline, in input order, without pacing or a job
/// record.
pub async fn apply_batch(
    executor: &dyn MutationExecutor,
    kind: &BatchKind,
    owner_id: DbId,
    items: &[BatchItemRequest],
) -> BatchProgress {
    let mut progress = BatchProgress::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        progress.record(apply_item(executor, kind, owner_id, index, item).await);
    }
    progress
}
