//! Product use-case service.
//!
//! # Responsibility
//! - Provide create/update/get/list/delete workflows over a
//!   `ProductRepository`.
//! - Reconcile tags only when the caller supplied a desired tag set.
//!
//! # Invariants
//! - `ProductUpdate::tag_ids == None` never touches `product_tags`.
//! - `ProductUpdate::tag_ids == Some(vec![])` removes every tag.
//! - Write results are read back from storage before being returned.

use crate::model::product::{
    NewProduct, ProductId, ProductRecord, ProductUpdate, ProductValidationError, TagId,
};
use crate::reconcile::{ReconcileError, ReconciliationResult};
use crate::repo::product_repo::{ProductRepository, RepoError, RepoResult};
use log::{info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for product use-cases.
#[derive(Debug)]
pub enum ProductServiceError {
    /// Input failed validation; nothing was written.
    Validation(ProductValidationError),
    /// Target product does not exist.
    ProductNotFound(ProductId),
    /// Tag reconciliation failed.
    Reconcile(ReconcileError),
    /// Other persistence-layer failure.
    Repo(RepoError),
    /// Write succeeded but read-back disagrees.
    InconsistentState(&'static str),
}

impl Display for ProductServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::ProductNotFound(id) => write!(f, "product not found: {id}"),
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => {
                write!(f, "inconsistent product state: {details}")
            }
        }
    }
}

impl Error for ProductServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Reconcile(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::ProductNotFound(_) | Self::InconsistentState(_) => None,
        }
    }
}

impl From<RepoError> for ProductServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::ProductNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::Reconcile(err) => Self::Reconcile(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ProductValidationError> for ProductServiceError {
    fn from(value: ProductValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Result of a product update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUpdateOutcome {
    /// Product as persisted after the update.
    pub product: ProductRecord,
    /// Tag reconciliation outcome, `None` when `tag_ids` was not supplied.
    pub tags: Option<ReconciliationResult>,
}

/// Product service facade over repository implementations.
pub struct ProductService<R: ProductRepository> {
    repo: R,
}

impl<R: ProductRepository> ProductService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates one product, linking its initial tags.
    pub fn create_product(
        &mut self,
        input: NewProduct,
    ) -> Result<ProductRecord, ProductServiceError> {
        input.validate()?;
        let id = self.repo.create_product(&input)?;
        info!(
            "event=product_create module=service status=ok product_id={id} tag_count={}",
            input.tag_ids.len()
        );
        self.repo
            .get_product(id)?
            .ok_or(ProductServiceError::InconsistentState(
                "created product not found in read-back",
            ))
    }

    /// Applies supplied fields, then reconciles tags when `tag_ids` is set.
    ///
    /// Field and tag writes are separate write scopes: a reconciliation
    /// failure does not undo an already applied field update.
    pub fn update_product(
        &mut self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<ProductUpdateOutcome, ProductServiceError> {
        update.validate()?;

        if !update.fields.is_empty() {
            self.repo.update_product_fields(id, &update.fields)?;
        }

        let tags = match update.tag_ids {
            Some(tag_ids) => {
                let desired: BTreeSet<TagId> = tag_ids.into_iter().collect();
                match self.repo.set_product_tags(id, &desired) {
                    Ok(result) => Some(result),
                    Err(err) => {
                        warn!(
                            "event=product_update module=service status=error product_id={id} phase=tags retryable={} error={err}",
                            err.is_retryable()
                        );
                        return Err(err.into());
                    }
                }
            }
            None => None,
        };

        let product = self
            .repo
            .get_product(id)?
            .ok_or(ProductServiceError::InconsistentState(
                "updated product not found in read-back",
            ))?;

        info!(
            "event=product_update module=service status=ok product_id={id} tags_added={} tags_removed={}",
            tags.as_ref().map_or(0, |result| result.added.len()),
            tags.as_ref().map_or(0, |result| result.removed.len())
        );
        Ok(ProductUpdateOutcome { product, tags })
    }

    /// Gets one product by id.
    pub fn get_product(&self, id: ProductId) -> RepoResult<Option<ProductRecord>> {
        self.repo.get_product(id)
    }

    /// Lists all products with categories and tags.
    pub fn list_products(&self) -> RepoResult<Vec<ProductRecord>> {
        self.repo.list_products()
    }

    /// Deletes one product; its tag links cascade in storage.
    pub fn delete_product(&mut self, id: ProductId) -> Result<(), ProductServiceError> {
        self.repo.delete_product(id)?;
        info!("event=product_delete module=service status=ok product_id={id}");
        Ok(())
    }
}
