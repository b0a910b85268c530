//! Domain types and collaborator contracts for expense batch jobs.
//!
//! This crate has no internal dependencies so that the HTTP layer, the
//! database layer, and the background worker can all share it.

pub mod batch;
pub mod error;
pub mod job_store;
pub mod mutation;
pub mod status;
pub mod types;
