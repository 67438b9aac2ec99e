//! Core domain logic for the product catalog.
//! This crate owns the product/tag association invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;

pub use config::{LoggingConfig, ReconcileMode, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::association::{AssociationId, AssociationRow, NewAssociation};
pub use model::product::{
    Category, CategoryId, NewProduct, ProductFields, ProductId, ProductRecord, ProductUpdate,
    ProductValidationError, Tag, TagId,
};
pub use reconcile::{
    plan, reconcile, OwnerGuard, OwnerLocks, ReconcileError, ReconcilePlan, ReconcileResult,
    ReconciliationResult, WritePhase,
};
pub use repo::association_repo::{
    AssociationStore, SqliteAssociationStore, StoreError, StoreResult,
};
pub use repo::memory_store::{MemoryAssociationStore, StoreCallCounts, StoreFault};
pub use repo::product_repo::{ProductRepository, RepoError, RepoResult, SqliteProductRepository};
pub use repo::taxonomy_repo::{SqliteTaxonomyRepository, TaxonomyRepository};
pub use service::product_service::{ProductService, ProductServiceError, ProductUpdateOutcome};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
