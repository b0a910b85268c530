//! [`MutationExecutor`] that runs allow-listed Postgres stored functions.

use std::collections::HashSet;

use async_trait::async_trait;
use expensa_core::mutation::{MutationError, MutationExecutor, MutationOutcome};
use serde_json::{Map, Value};

use crate::repositories::stored_function_repo::is_sql_identifier;
use crate::repositories::StoredFunctionRepo;
use crate::DbPool;

/// Executes each operation as `SELECT <operation>($1::jsonb)`.
///
/// Only operations registered at construction can be called; anything else
/// fails with [`MutationError::UnknownOperation`] without touching the
/// database.
#[derive(Debug, Clone)]
pub struct PgMutationExecutor {
    pool: DbPool,
    operations: HashSet<String>,
}

impl PgMutationExecutor {
    /// Build an executor allowing the given stored functions.
    ///
    /// # Panics
    ///
    /// Panics if an operation is not a plain SQL identifier. Operation
    /// names are compile-time constants, so this is a programming error.
    pub fn new(pool: DbPool, operations: &[&str]) -> Self {
        for op in operations {
            assert!(
                is_sql_identifier(op),
                "operation {op:?} is not a valid SQL function name"
            );
        }
        Self {
            pool,
            operations: operations.iter().map(|op| (*op).to_string()).collect(),
        }
    }
}

#[async_trait]
impl MutationExecutor for PgMutationExecutor {
    async fn execute(
        &self,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<MutationOutcome, MutationError> {
        if !self.operations.contains(operation) {
            return Err(MutationError::UnknownOperation(operation.to_string()));
        }

        let raw = StoredFunctionRepo::call_json(&self.pool, operation, payload)
            .await
            .map_err(|e| MutationError::Execution(e.to_string()))?;

        if raw.is_null() {
            return Err(MutationError::Execution(format!(
                "{operation} returned no result"
            )));
        }

        serde_json::from_value(raw).map_err(|e| {
            MutationError::Execution(format!("{operation} returned an unexpected shape: {e}"))
        })
    }
}
