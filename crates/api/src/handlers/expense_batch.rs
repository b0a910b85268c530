//! Handlers for expense batch updates, synchronous and background.
//!
//! All endpoints require authentication via [`AuthUser`]; the caller's id is
//! passed explicitly into every orchestrator call and scopes every read.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use expensa_core::batch::{BatchItemRequest, ItemOutcome};
use expensa_core::status::BatchJobStatus;
use expensa_core::types::DbId;
use serde::Serialize;
use serde_json::Value;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// Body of a `202 Accepted` batch submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedBatch {
    pub job_id: DbId,
    pub total_items: i32,
    pub status: BatchJobStatus,
}

/// Body of a synchronous batch update.
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: i32,
    pub failed: i32,
    pub results: Vec<ItemOutcome>,
}

fn into_items(body: Vec<Value>) -> Vec<BatchItemRequest> {
    body.into_iter().map(BatchItemRequest::from).collect()
}

// ---------------------------------------------------------------------------
// Synchronous
// ---------------------------------------------------------------------------

/// PUT /api/v1/expenses/batch
///
/// Apply every update inline. Responds 200 when all items succeeded and
/// 207 Multi-Status otherwise; per-item outcomes are in `results`.
pub async fn update_batch(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<Vec<Value>>,
) -> AppResult<impl IntoResponse> {
    let items = into_items(body);
    let progress = state.batches.apply_now(auth.user_id, &items).await?;

    let status = if progress.failed == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    let summary = BatchSummary {
        total: items.len(),
        successful: progress.successful,
        failed: progress.failed,
        results: progress.results,
    };

    Ok((status, Json(DataResponse { data: summary })))
}

// ---------------------------------------------------------------------------
// Background
// ---------------------------------------------------------------------------

/// PUT /api/v1/expenses/batch-async
///
/// Accept a batch for background processing. Returns 202 with the job id
/// as soon as the job exists; poll the status endpoint for progress.
pub async fn submit_batch(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<Vec<Value>>,
) -> AppResult<impl IntoResponse> {
    let job = state.batches.submit(auth.user_id, into_items(body)).await?;

    let accepted = SubmittedBatch {
        job_id: job.id,
        total_items: job.total_items,
        status: job.status,
    };
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: accepted })))
}

/// GET /api/v1/expenses/batch-async
///
/// The caller's batch jobs, newest first. Supports `limit` and `offset`.
pub async fn list_batch_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .batches
        .list(auth.user_id, params.limit, params.offset)
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/expenses/batch-async/{job_id}
///
/// Current snapshot of one job. Jobs of other users are reported as not
/// found.
pub async fn get_batch_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.batches.status(job_id, auth.user_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/expenses/batch-async/{job_id}/cancel
///
/// Ask the worker to stop before its next item. Returns 202 with the
/// snapshot taken before cancelling, 409 if the job already finished.
pub async fn cancel_batch_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.batches.cancel(job_id, auth.user_id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}
