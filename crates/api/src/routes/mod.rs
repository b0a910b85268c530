pub mod expenses;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /expenses/batch                                  synchronous batch update (PUT)
/// /expenses/batch-async                            list jobs (GET), submit batch (PUT)
/// /expenses/batch-async/{job_id}                   job status (GET)
/// /expenses/batch-async/{job_id}/cancel            cancel job (POST)
/// ```
///
/// `/health` is mounted at the root, outside this tree.
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/expenses", expenses::router())
}
