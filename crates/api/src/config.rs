use std::str::FromStr;

use expensa_worker::pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use expensa_worker::PoolConfig;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for batch workers to stop (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Database pool size (default: `20`).
    pub db_max_connections: u32,
    /// Emit JSON logs instead of human-readable text.
    pub log_json: bool,
    /// JWT validation settings.
    pub jwt: JwtConfig,
    /// Background batch processing settings.
    pub batch: BatchConfig,
}

/// Background batch processing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Concurrently running batch workers.
    pub workers: usize,
    /// Accepted batches waiting for a worker.
    pub queue_capacity: usize,
    /// Items processed per second across all workers; 0 disables pacing.
    pub items_per_sec: u32,
    /// Items that may be processed back to back before pacing kicks in.
    pub burst: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            items_per_sec: 10,
            burst: 1,
        }
    }
}

impl BatchConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `DB_MAX_CONNECTIONS`    | `20`                    |
    /// | `LOG_FORMAT`            | `text` (or `json`)      |
    /// | `BATCH_WORKERS`         | `4`                     |
    /// | `BATCH_QUEUE_CAPACITY`  | `64`                    |
    /// | `BATCH_ITEMS_PER_SEC`   | `10` (`0` = unpaced)    |
    /// | `BATCH_BURST`           | `1`                     |
    ///
    /// JWT settings are documented on [`JwtConfig::from_env`].
    ///
    /// # Panics
    ///
    /// Panics on malformed values, or if `BATCH_WORKERS` or
    /// `BATCH_QUEUE_CAPACITY` is 0.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", 30);
        let db_max_connections: u32 =
            env_or("DB_MAX_CONNECTIONS", expensa_db::DEFAULT_MAX_CONNECTIONS);

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let defaults = BatchConfig::default();
        let batch = BatchConfig {
            workers: env_or("BATCH_WORKERS", defaults.workers),
            queue_capacity: env_or("BATCH_QUEUE_CAPACITY", defaults.queue_capacity),
            items_per_sec: env_or("BATCH_ITEMS_PER_SEC", defaults.items_per_sec),
            burst: env_or("BATCH_BURST", defaults.burst),
        };
        assert!(batch.workers > 0, "BATCH_WORKERS must be at least 1");
        assert!(
            batch.queue_capacity > 0,
            "BATCH_QUEUE_CAPACITY must be at least 1"
        );

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            db_max_connections,
            log_json,
            jwt: JwtConfig::from_env(),
            batch,
        }
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
///
/// Panics if the variable is set but does not parse.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} is invalid ({raw:?}): {e}")),
        Err(_) => default,
    }
}
