//! Postgres persistence for batch jobs.
//!
//! - [`repositories`] -- zero-sized repositories taking `&PgPool`.
//! - [`store::PgJobStore`] -- the [`JobStore`](expensa_core::job_store::JobStore)
//!   implementation backed by the `batch_jobs` table.
//! - [`executor::PgMutationExecutor`] -- runs registered stored functions.

use sqlx::postgres::PgPoolOptions;

pub mod executor;
pub mod models;
pub mod repositories;
pub mod store;

pub use executor::PgMutationExecutor;
pub use store::PgJobStore;

pub type DbPool = sqlx::PgPool;

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply all pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
