//! Domain model for the product catalog.
//!
//! # Responsibility
//! - Define products, categories, tags and the product/tag join rows.
//! - Define validated input shapes for create and update workflows.
//!
//! # Invariants
//! - Every entity is identified by a stable integer rowid.
//! - A product links to a tag through at most one association row.

pub mod association;
pub mod product;
