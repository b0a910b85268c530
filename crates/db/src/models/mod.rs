//! Database row structs.
//!
//! Each submodule contains a `FromRow` struct matching the table row and
//! the conversion into the domain type from `expensa_core`.

pub mod batch_job;
