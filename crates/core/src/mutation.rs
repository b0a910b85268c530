//! The mutation executor seam: one durable per-item update behind a named
//! operation.
//!
//! The batch machinery never sees how an operation is persisted; it hands
//! over a payload keyed by field name and reads back a [`MutationOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::batch::ITEM_FAILURE_FALLBACK_MESSAGE;

/// Structured result of one mutation, as returned by the stored function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl MutationOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(Value::String(message.into())),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(Value::String(message.into())),
            ..Self::default()
        }
    }

    /// Message describing a failed outcome.
    ///
    /// Prefers `message`, then `error`, then a generic fallback. Empty
    /// strings and nulls are skipped; non-string values are rendered as JSON.
    pub fn failure_message(&self) -> String {
        [&self.message, &self.error]
            .into_iter()
            .flatten()
            .find_map(text_of)
            .unwrap_or_else(|| ITEM_FAILURE_FALLBACK_MESSAGE.to_string())
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Errors raised before a mutation produced an outcome.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Mutation execution failed: {0}")]
    Execution(String),
}

/// Performs one durable update for a named operation.
///
/// Implementations must be safe to call concurrently from several batch
/// workers.
#[async_trait]
pub trait MutationExecutor: Send + Sync {
    async fn execute(
        &self,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<MutationOutcome, MutationError>;
}
