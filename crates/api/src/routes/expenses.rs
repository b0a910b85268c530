//! Route definitions for the `/expenses` batch endpoints.
//!
//! All endpoints require authentication.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::expense_batch;
use crate::state::AppState;

/// Routes mounted at `/expenses`.
///
/// ```text
/// PUT    /batch                        -> update_batch
/// GET    /batch-async                  -> list_batch_jobs
/// PUT    /batch-async                  -> submit_batch
/// GET    /batch-async/{job_id}         -> get_batch_job
/// POST   /batch-async/{job_id}/cancel  -> cancel_batch_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/batch", put(expense_batch::update_batch))
        .route(
            "/batch-async",
            get(expense_batch::list_batch_jobs).put(expense_batch::submit_batch),
        )
        .route("/batch-async/{job_id}", get(expense_batch::get_batch_job))
        .route(
            "/batch-async/{job_id}/cancel",
            post(expense_batch::cancel_batch_job),
        )
}
