//! # Row Store Implementations
//!
//! - [`inventory`] - Postgres, for hosted deployments
//! - [`memory`] - process-local, for tests and single-machine demos

pub mod inventory;
pub mod memory;
