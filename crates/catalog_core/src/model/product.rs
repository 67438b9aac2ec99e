//! Product, category and tag records plus workflow inputs.
//!
//! # Responsibility
//! - Describe the read model returned by product queries.
//! - Turn loosely shaped create/update payloads into typed inputs with
//!   explicit optional fields.
//!
//! # Invariants
//! - `ProductUpdate::tag_ids == None` means "leave tags untouched";
//!   `Some(vec![])` means "remove every tag".
//! - Prices are stored as integer cents.
//! - `ProductFields::category_id == Some(None)` (JSON `null`) clears the
//!   category; an absent key leaves it unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ProductId = i64;
pub type CategoryId = i64;
pub type TagId = i64;

/// Product grouping. A product keeps at most one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub category_name: String,
}

/// Label attached to products through `product_tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub tag_name: String,
}

/// Read model for product list/detail use-cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub product_name: String,
    pub price_cents: i64,
    pub stock: i64,
    /// `None` once the category has been deleted.
    pub category: Option<Category>,
    /// Linked tags ordered by tag id.
    pub tags: Vec<Tag>,
}

impl ProductRecord {
    /// Linked tag ids in ascending order.
    pub fn tag_ids(&self) -> Vec<TagId> {
        self.tags.iter().map(|tag| tag.id).collect()
    }
}

/// Input for product creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub product_name: String,
    pub price_cents: i64,
    pub stock: i64,
    pub category_id: CategoryId,
    /// Initial tags. Duplicates collapse.
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
}

impl NewProduct {
    /// Builds an untagged product input.
    pub fn new(
        product_name: impl Into<String>,
        price_cents: i64,
        stock: i64,
        category_id: CategoryId,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            price_cents,
            stock,
            category_id,
            tag_ids: Vec::new(),
        }
    }

    /// Returns a copy carrying the given initial tags.
    pub fn with_tags(mut self, tag_ids: impl IntoIterator<Item = TagId>) -> Self {
        self.tag_ids = tag_ids.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), ProductValidationError> {
        validate_name(&self.product_name)?;
        validate_price(self.price_cents)?;
        validate_stock(self.stock)
    }
}

/// Scalar product fields, each optional for partial updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFields {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub stock: Option<i64>,
    /// `Some(None)` detaches the product from its category.
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id: Option<Option<CategoryId>>,
}

impl ProductFields {
    /// True when no scalar field is supplied.
    pub fn is_empty(&self) -> bool {
        self.product_name.is_none()
            && self.price_cents.is_none()
            && self.stock.is_none()
            && self.category_id.is_none()
    }

    pub fn validate(&self) -> Result<(), ProductValidationError> {
        if let Some(name) = self.product_name.as_deref() {
            validate_name(name)?;
        }
        if let Some(price) = self.price_cents {
            validate_price(price)?;
        }
        if let Some(stock) = self.stock {
            validate_stock(stock)?;
        }
        Ok(())
    }
}

/// Input for product updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(flatten)]
    pub fields: ProductFields,
    /// Complete desired tag membership, or `None` to skip reconciliation.
    #[serde(default)]
    pub tag_ids: Option<Vec<TagId>>,
}

impl ProductUpdate {
    /// Update that only replaces the tag set.
    pub fn tags_only(tag_ids: impl IntoIterator<Item = TagId>) -> Self {
        Self {
            fields: ProductFields::default(),
            tag_ids: Some(tag_ids.into_iter().collect()),
        }
    }

    /// Rejects updates that carry nothing to apply.
    pub fn validate(&self) -> Result<(), ProductValidationError> {
        if self.fields.is_empty() && self.tag_ids.is_none() {
            return Err(ProductValidationError::EmptyUpdate);
        }
        self.fields.validate()
    }
}

/// Validation errors for product inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductValidationError {
    /// Name is blank after trim.
    BlankName,
    /// Price must be strictly positive.
    NonPositivePrice(i64),
    /// Stock must not be negative.
    NegativeStock(i64),
    /// Update carries neither fields nor `tag_ids`.
    EmptyUpdate,
}

impl Display for ProductValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "product_name must not be blank"),
            Self::NonPositivePrice(value) => {
                write!(f, "price_cents must be positive, got {value}")
            }
            Self::NegativeStock(value) => write!(f, "stock must not be negative, got {value}"),
            Self::EmptyUpdate => write!(
                f,
                "update needs at least one of product_name, price_cents, stock, category_id, tag_ids"
            ),
        }
    }
}

impl Error for ProductValidationError {}

/// Maps a present key to `Some`, keeping JSON `null` as `Some(None)`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_name(name: &str) -> Result<(), ProductValidationError> {
    if name.trim().is_empty() {
        return Err(ProductValidationError::BlankName);
    }
    Ok(())
}

fn validate_price(price_cents: i64) -> Result<(), ProductValidationError> {
    if price_cents <= 0 {
        return Err(ProductValidationError::NonPositivePrice(price_cents));
    }
    Ok(())
}

fn validate_stock(stock: i64) -> Result<(), ProductValidationError> {
    if stock < 0 {
        return Err(ProductValidationError::NegativeStock(stock));
    }
    Ok(())
}
