//! Background batch processing.
//!
//! The [`BatchOrchestrator`] validates and accepts batches, the
//! [`WorkerPool`] schedules them onto a fixed set of consumer tasks, and the
//! [`BatchRunner`] applies each batch item by item while checkpointing
//! progress to the job store.

pub mod item;
pub mod orchestrator;
pub mod pool;
pub mod rate_limit;
pub mod runner;

#[cfg(test)]
mod testing;

pub use orchestrator::BatchOrchestrator;
pub use pool::{PoolConfig, PoolError, WorkerPool};
pub use rate_limit::{RateLimit, TokenBucket, Unthrottled};
pub use runner::{BatchRunner, BatchTask};
