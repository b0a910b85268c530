//! Shared harness for the HTTP integration tests.
//!
//! Builds the real router over an in-memory job store and a scripted
//! mutation executor, so no database is needed.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use expensa_api::auth::jwt::{generate_access_token, JwtConfig};
use expensa_api::config::{BatchConfig, ServerConfig};
use expensa_api::router::build_app_router;
use expensa_api::state::AppState;
use expensa_core::batch::EXPENSE_BATCH_UPDATE;
use expensa_core::job_store::MemoryJobStore;
use expensa_core::mutation::{MutationError, MutationExecutor, MutationOutcome};
use expensa_worker::{BatchOrchestrator, BatchRunner, Unthrottled};
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use tokio::sync::{Notify, Semaphore};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret-long-enough";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        db_max_connections: 1,
        log_json: false,
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        batch: BatchConfig {
            workers: 2,
            queue_capacity: 8,
            items_per_sec: 0,
            burst: 1,
        },
    }
}

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

/// Succeeds for every `expenseId` except the rejected ones. With a gate,
/// each call waits for a semaphore permit.
#[derive(Default)]
pub struct ScriptedExecutor {
    rejected: HashSet<i64>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Notify,
    pub calls: Mutex<Vec<Map<String, Value>>>,
}

impl ScriptedExecutor {
    pub fn reject(mut self, key: i64) -> Self {
        self.rejected.insert(key);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
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
        if self.rejected.contains(&key) {
            Ok(MutationOutcome::failure("Expense not found"))
        } else {
            Ok(MutationOutcome::success("Expense updated"))
        }
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryJobStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub batches: Arc<BatchOrchestrator>,
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(ScriptedExecutor::default(), test_config())
}

pub fn build_test_app_with(executor: ScriptedExecutor, config: ServerConfig) -> TestApp {
    let store = Arc::new(MemoryJobStore::new());
    let executor = Arc::new(executor);
    let runner = Arc::new(BatchRunner::new(
        store.clone(),
        executor.clone(),
        Arc::new(Unthrottled),
    ));
    let batches = Arc::new(BatchOrchestrator::new(
        runner,
        config.batch.pool_config(),
        EXPENSE_BATCH_UPDATE,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        batches: Arc::clone(&batches),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        executor,
        batches,
    }
}

pub fn token_for(user_id: i64) -> String {
    let config = JwtConfig {
        secret: JWT_SECRET.to_string(),
        access_token_expiry_mins: 15,
    };
    generate_access_token(user_id, &config).unwrap()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_as(app: &TestApp, user_id: i64, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(&token_for(user_id)), None).await
}

pub async fn put_json_as(app: &TestApp, user_id: i64, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(&token_for(user_id)), Some(body)).await
}

pub async fn post_as(app: &TestApp, user_id: i64, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(&token_for(user_id)), None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll the status endpoint until the job reaches a terminal status.
pub async fn wait_for_terminal(app: &TestApp, user_id: i64, job_id: i64) -> Value {
    let uri = format!("/api/v1/expenses/batch-async/{job_id}");
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = body_json(get_as(app, user_id, &uri).await).await["data"].clone();
            let status = job["status"].as_str().unwrap_or_default();
            if matches!(status, "completed" | "failed" | "cancelled") {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("batch job did not finish in time")
}
