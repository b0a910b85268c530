//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods
//! that accept `&PgPool` as the first argument.

pub mod batch_job_repo;
pub mod stored_function_repo;

pub use batch_job_repo::BatchJobRepo;
pub use stored_function_repo::StoredFunctionRepo;
