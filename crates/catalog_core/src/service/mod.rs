//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Decide whether a tag reconciliation runs at all for an update.

pub mod product_service;
