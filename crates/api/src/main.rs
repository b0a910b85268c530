use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use expensa_core::batch::EXPENSE_BATCH_UPDATE;
use expensa_core::job_store::JobStore;
use expensa_db::{PgJobStore, PgMutationExecutor};
use expensa_worker::rate_limit::rate_limit_for;
use expensa_worker::{BatchOrchestrator, BatchRunner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use expensa_api::config::ServerConfig;
use expensa_api::router::build_app_router;
use expensa_api::state::AppState;

const DEFAULT_LOG_FILTER: &str = "expensa_api=debug,expensa_worker=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = expensa_db::create_pool(&database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    expensa_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    expensa_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Job store ---
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let abandoned = store
        .abandon_unfinished()
        .await
        .expect("Failed to recover unfinished batch jobs");
    if abandoned > 0 {
        tracing::warn!(abandoned, "Cancelled batch jobs left unfinished by a previous run");
    }

    // --- Batch workers ---
    let executor = Arc::new(PgMutationExecutor::new(
        pool,
        &[EXPENSE_BATCH_UPDATE.operation],
    ));
    let rate_limit = rate_limit_for(config.batch.items_per_sec, config.batch.burst);
    let runner = Arc::new(BatchRunner::new(store, executor, rate_limit));
    let batches = Arc::new(BatchOrchestrator::new(
        runner,
        config.batch.pool_config(),
        EXPENSE_BATCH_UPDATE,
    ));
    tracing::info!(
        items_per_sec = config.batch.items_per_sec,
        burst = config.batch.burst,
        "Batch orchestrator ready"
    );

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        batches: Arc::clone(&batches),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping batch workers");

    let stopped = batches
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if !stopped {
        tracing::warn!("Some batch jobs may still be marked processing until the next start");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
