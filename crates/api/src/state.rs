use std::sync::Arc;

use expensa_worker::BatchOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (read by the auth extractor).
    pub config: Arc<ServerConfig>,
    /// Expense batch orchestrator: submission, status, cancellation.
    pub batches: Arc<BatchOrchestrator>,
}
