//! Authentication primitives.
//!
//! - [`jwt`] -- validation (and, for tests and tooling, signing) of HS256
//!   access tokens.

pub mod jwt;
