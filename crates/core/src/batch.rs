//! Batch update contract shared by the orchestrator, the background worker,
//! and the synchronous batch endpoint.
//!
//! Pure types and functions only: validation of an incoming batch, the
//! per-item payload projection, and the counter bookkeeping that decides a
//! job's final status.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::status::BatchJobStatus;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of items accepted in one batch.
pub const MAX_BATCH_ITEMS: usize = 100;

/// Field carrying the owner id in every mutation payload.
pub const OWNER_FIELD: &str = "userId";

/// Outcome message for an item submitted without its key.
pub const MISSING_ITEM_KEY_MESSAGE: &str = "item key is required";

/// Outcome message recorded for a successfully applied item.
pub const ITEM_SUCCESS_MESSAGE: &str = "Successfully updated";

/// Outcome message used when a failed mutation carries no message or error.
pub const ITEM_FAILURE_FALLBACK_MESSAGE: &str = "Update failed";

// ---------------------------------------------------------------------------
// Batch kinds
// ---------------------------------------------------------------------------

/// Describes how items of one job type map onto a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchKind {
    /// Tag stored on the job record.
    pub job_type: &'static str,
    /// Name of the mutation the executor runs for each item.
    pub operation: &'static str,
    /// Field identifying the record an item updates.
    pub key_field: &'static str,
    /// Fields forwarded to the mutation when present on the item.
    pub updatable_fields: &'static [&'static str],
}

/// Batch update of a user's expenses.
pub const EXPENSE_BATCH_UPDATE: BatchKind = BatchKind {
    job_type: "expense_batch_update",
    operation: "update_expense_v3",
    key_field: "expenseId",
    updatable_fields: &["title", "amount", "categoryId", "date", "notes"],
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One row of an incoming batch: an item key plus a sparse set of fields.
///
/// Kept as the raw JSON object so that "field absent" and "field set to a
/// value" stay distinguishable all the way to the mutation payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchItemRequest(pub Map<String, Value>);

impl BatchItemRequest {
    /// The item key, if present. A JSON `null` key counts as missing.
    pub fn item_key(&self, kind: &BatchKind) -> Option<&Value> {
        self.0.get(kind.key_field).filter(|v| !v.is_null())
    }

    /// Build the mutation payload for this item.
    ///
    /// Contains the item key, the owner id, and only those updatable fields
    /// the item actually carries. Anything else on the item (including a
    /// client-supplied owner field) is dropped. Returns `None` when the item
    /// key is missing.
    pub fn to_payload(&self, kind: &BatchKind, owner_id: DbId) -> Option<Map<String, Value>> {
        let key = self.item_key(kind)?;

        let mut payload = Map::with_capacity(kind.updatable_fields.len() + 2);
        payload.insert(kind.key_field.to_string(), key.clone());
        payload.insert(OWNER_FIELD.to_string(), Value::from(owner_id));

        for field in kind.updatable_fields {
            if let Some(value) = self.0.get(*field) {
                payload.insert((*field).to_string(), value.clone());
            }
        }

        Some(payload)
    }
}

impl From<Value> for BatchItemRequest {
    /// Non-object values become an empty item, which then fails on its
    /// missing key.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Validate the shape of a batch before anything is created or executed.
///
/// Rules:
/// - At least one item.
/// - At most [`MAX_BATCH_ITEMS`] items.
///
/// Per-item problems (e.g. a missing key) are not rejected here; they are
/// reported as item failures.
pub fn validate_batch(items: &[BatchItemRequest]) -> Result<(), CoreError> {
    if items.is_empty() {
        return Err(CoreError::Validation("No updates provided".to_string()));
    }
    if items.len() > MAX_BATCH_ITEMS {
        return Err(CoreError::Validation(format!(
            "Batch size too large. Maximum {MAX_BATCH_ITEMS} updates allowed"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of processing one item, appended to the job's results list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    /// Position of the item in the submitted batch.
    pub index: usize,
    /// The item key as submitted, `None` if it was missing.
    pub item_key: Option<Value>,
    pub success: bool,
    pub message: String,
}

impl ItemOutcome {
    pub fn succeeded(index: usize, item_key: Value) -> Self {
        Self {
            index,
            item_key: Some(item_key),
            success: true,
            message: ITEM_SUCCESS_MESSAGE.to_string(),
        }
    }

    pub fn failed(index: usize, item_key: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            index,
            item_key,
            success: false,
            message: message.into(),
        }
    }

    pub fn missing_key(index: usize) -> Self {
        Self::failed(index, None, MISSING_ITEM_KEY_MESSAGE)
    }
}

/// Running counters and results of one batch.
///
/// `processed == successful + failed` and `results.len() == processed`
/// hold after every [`record`](Self::record).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchProgress {
    pub processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub results: Vec<ItemOutcome>,
}

impl BatchProgress {
    pub fn with_capacity(total: usize) -> Self {
        Self {
            results: Vec::with_capacity(total),
            ..Self::default()
        }
    }

    /// Count one processed item and append its outcome.
    pub fn record(&mut self, outcome: ItemOutcome) {
        if outcome.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.processed += 1;
        self.results.push(outcome);
    }

    /// Terminal status of a run that exhausted its input.
    ///
    /// `failed` only when every item failed; any success makes the job
    /// `completed`, partial failures included.
    pub fn final_status(&self, total_items: i32) -> BatchJobStatus {
        if self.failed == total_items {
            BatchJobStatus::Failed
        } else {
            BatchJobStatus::Completed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
