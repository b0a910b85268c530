//! Calls JSON-in / JSON-out stored functions.
//!
//! The function name is formatted into the statement, so callers must only
//! pass names from a fixed allow-list (see [`is_sql_identifier`]).

use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;

/// Whether `name` is a plain, unquoted SQL identifier.
///
/// Lowercase ASCII letters, digits, and underscores, not starting with a
/// digit, at most 63 bytes (the Postgres identifier limit).
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Provides raw stored-function calls.
pub struct StoredFunctionRepo;

impl StoredFunctionRepo {
    /// Run `SELECT <function>($1::jsonb)` and return its JSON result.
    ///
    /// A SQL `NULL` result is returned as [`Value::Null`].
    pub async fn call_json(
        pool: &PgPool,
        function: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value, sqlx::Error> {
        if !is_sql_identifier(function) {
            return Err(sqlx::Error::Protocol(format!(
                "refusing to call non-identifier function name {function:?}"
            )));
        }

        let query = format!("SELECT {function}($1::jsonb)::jsonb");
        let result = sqlx::query_scalar::<_, Option<Value>>(&query)
            .bind(Json(payload))
            .fetch_one(pool)
            .await?;
        Ok(result.unwrap_or(Value::Null))
    }
}
