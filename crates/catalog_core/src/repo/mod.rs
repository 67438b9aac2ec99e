//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define the association store contract the reconciler drives.
//! - Isolate SQL details from service orchestration.
//!
//! # Invariants
//! - Store and repository APIs return semantic errors (`NotFound`,
//!   `Conflict`, `Constraint`) in addition to transport errors.

pub mod association_repo;
pub mod memory_store;
pub mod product_repo;
pub mod taxonomy_repo;
