//! Product repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide product create/read/update/delete over the `products` table.
//! - Drive tag reconciliation for one product under the configured
//!   `ReconcileMode` and optional `OwnerLocks`.
//!
//! # Invariants
//! - Write paths validate inputs before SQL mutations.
//! - Product creation is a reconciliation against an empty tag set, applied
//!   in the same transaction as the product insert in every `ReconcileMode`.
//! - `ReconcileMode` governs `set_product_tags` only. In `Transactional`
//!   mode a failure rolls back every write of the call.
//! - Deleting a product removes its `product_tags` rows through the schema
//!   cascade, never through the reconciler.

use crate::config::{ReconcileMode, StoreConfig};
use crate::model::product::{
    Category, NewProduct, ProductFields, ProductId, ProductRecord, ProductValidationError, Tag,
    TagId,
};
use crate::reconcile::{reconcile, OwnerLocks, ReconcileError, ReconciliationResult};
use crate::repo::association_repo::{SqliteAssociationStore, StoreError};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const PRODUCT_SELECT_SQL: &str = "SELECT
    p.id,
    p.product_name,
    p.price_cents,
    p.stock,
    p.category_id,
    c.category_name
FROM products p
LEFT JOIN categories c ON c.id = p.category_id";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for product persistence and tag reconciliation.
#[derive(Debug)]
pub enum RepoError {
    Validation(ProductValidationError),
    Store(StoreError),
    NotFound(ProductId),
    InvalidData(String),
    Reconcile(ReconcileError),
}

impl RepoError {
    /// True when a concurrent writer caused the failure.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Store(err) => err.is_conflict(),
            Self::Reconcile(err) => matches!(err, ReconcileError::Conflict(_)),
            _ => false,
        }
    }

    /// True when re-running the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_conflict(),
            Self::Reconcile(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn rolled_back(self) -> Self {
        match self {
            Self::Reconcile(err) => Self::Reconcile(err.rolled_back()),
            other => other,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "product not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted product data: {message}"),
            Self::Reconcile(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Reconcile(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ProductValidationError> for RepoError {
    fn from(value: ProductValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ReconcileError> for RepoError {
    fn from(value: ReconcileError) -> Self {
        Self::Reconcile(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(value))
    }
}

/// Repository interface for product use-cases.
pub trait ProductRepository {
    /// Inserts a product and links its initial tags.
    fn create_product(&mut self, input: &NewProduct) -> RepoResult<ProductId>;
    /// Updates the supplied scalar fields only.
    fn update_product_fields(&mut self, id: ProductId, fields: &ProductFields)
        -> RepoResult<()>;
    /// Makes the product's tag set equal `desired`.
    fn set_product_tags(
        &mut self,
        id: ProductId,
        desired: &BTreeSet<TagId>,
    ) -> RepoResult<ReconciliationResult>;
    /// Gets one product with its category and tags.
    fn get_product(&self, id: ProductId) -> RepoResult<Option<ProductRecord>>;
    /// Lists every product with its category and tags, ordered by id.
    fn list_products(&self) -> RepoResult<Vec<ProductRecord>>;
    /// Deletes one product; its tag links cascade.
    fn delete_product(&mut self, id: ProductId) -> RepoResult<()>;
}

/// SQLite-backed product repository.
pub struct SqliteProductRepository<'conn> {
    conn: &'conn mut Connection,
    config: StoreConfig,
    owner_locks: Option<Arc<OwnerLocks>>,
}

impl<'conn> SqliteProductRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn mut Connection, config: StoreConfig) -> RepoResult<Self> {
        ensure_catalog_connection_ready(conn)?;
        Ok(Self {
            conn,
            config,
            owner_locks: None,
        })
    }

    /// Serializes tag reconciliations per product through `locks`.
    ///
    /// Share one `OwnerLocks` between repositories that write the same
    /// database from different threads.
    pub fn with_owner_locks(mut self, locks: Arc<OwnerLocks>) -> Self {
        self.owner_locks = Some(locks);
        self
    }

    /// Runs `work` in one `BEGIN IMMEDIATE` transaction or in autocommit
    /// mode, depending on `StoreConfig::reconcile_mode`.
    fn write_scope<T>(
        &mut self,
        work: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        match self.config.reconcile_mode {
            ReconcileMode::Transactional => self.immediate_transaction(work),
            ReconcileMode::IndependentBatches => work(&*self.conn),
        }
    }

    /// Runs `work` in one `BEGIN IMMEDIATE` transaction; any error rolls
    /// back every statement `work` issued.
    fn immediate_transaction<T>(
        &mut self,
        work: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let conn: &Connection = &tx;
        let value = work(conn).map_err(RepoError::rolled_back)?;
        tx.commit()?;
        Ok(value)
    }
}

impl ProductRepository for SqliteProductRepository<'_> {
    fn create_product(&mut self, input: &NewProduct) -> RepoResult<ProductId> {
        input.validate()?;
        let desired: BTreeSet<TagId> = input.tag_ids.iter().copied().collect();

        // Product row and initial links commit together in every mode.
        self.immediate_transaction(|conn| {
            conn.execute(
                "INSERT INTO products (product_name, price_cents, stock, category_id)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    input.product_name.trim(),
                    input.price_cents,
                    input.stock,
                    input.category_id,
                ],
            )?;
            let id = conn.last_insert_rowid();

            if !desired.is_empty() {
                let mut store = SqliteAssociationStore::new(conn);
                reconcile(&mut store, id, &desired)?;
            }
            Ok(id)
        })
    }

    fn update_product_fields(
        &mut self,
        id: ProductId,
        fields: &ProductFields,
    ) -> RepoResult<()> {
        fields.validate()?;

        if fields.is_empty() {
            return if product_exists(self.conn, id)? {
                Ok(())
            } else {
                Err(RepoError::NotFound(id))
            };
        }

        let mut assignments = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(name) = fields.product_name.as_deref() {
            assignments.push("product_name = ?");
            bind_values.push(Value::Text(name.trim().to_string()));
        }
        if let Some(price) = fields.price_cents {
            assignments.push("price_cents = ?");
            bind_values.push(Value::Integer(price));
        }
        if let Some(stock) = fields.stock {
            assignments.push("stock = ?");
            bind_values.push(Value::Integer(stock));
        }
        if let Some(category_id) = fields.category_id {
            assignments.push("category_id = ?");
            bind_values.push(category_id.map_or(Value::Null, Value::Integer));
        }
        bind_values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE products SET {} WHERE id = ?;",
            assignments.join(", ")
        );
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn set_product_tags(
        &mut self,
        id: ProductId,
        desired: &BTreeSet<TagId>,
    ) -> RepoResult<ReconciliationResult> {
        let locks = self.owner_locks.clone();
        let _guard = match locks.as_deref() {
            Some(locks) => Some(
                locks
                    .acquire_timeout(id, self.config.busy_timeout)
                    .ok_or_else(|| {
                        ReconcileError::Conflict(StoreError::Conflict(format!(
                            "product {id} is being reconciled by another caller"
                        )))
                    })?,
            ),
            None => None,
        };

        self.write_scope(|conn| {
            if !product_exists(conn, id)? {
                return Err(RepoError::NotFound(id));
            }
            let mut store = SqliteAssociationStore::new(conn);
            Ok(reconcile(&mut store, id, desired)?)
        })
    }

    fn get_product(&self, id: ProductId) -> RepoResult<Option<ProductRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PRODUCT_SELECT_SQL} WHERE p.id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            let mut product = parse_product_row(row)?;
            product.tags = load_tags_for_product(&*self.conn, product.id)?;
            return Ok(Some(product));
        }
        Ok(None)
    }

    fn list_products(&self) -> RepoResult<Vec<ProductRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PRODUCT_SELECT_SQL} ORDER BY p.id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut products = Vec::new();
        while let Some(row) = rows.next()? {
            let mut product = parse_product_row(row)?;
            product.tags = load_tags_for_product(&*self.conn, product.id)?;
            products.push(product);
        }
        Ok(products)
    }

    fn delete_product(&mut self, id: ProductId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn parse_product_row(row: &Row<'_>) -> RepoResult<ProductRecord> {
    let category_id: Option<i64> = row.get("category_id")?;
    let category_name: Option<String> = row.get("category_name")?;
    let category = match (category_id, category_name) {
        (Some(id), Some(category_name)) => Some(Category { id, category_name }),
        (None, _) => None,
        (Some(id), None) => {
            return Err(RepoError::InvalidData(format!(
                "products.category_id `{id}` has no matching category"
            )));
        }
    };

    Ok(ProductRecord {
        id: row.get("id")?,
        product_name: row.get("product_name")?,
        price_cents: row.get("price_cents")?,
        stock: row.get("stock")?,
        category,
        tags: Vec::new(),
    })
}

fn load_tags_for_product(conn: &Connection, id: ProductId) -> RepoResult<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.tag_name
         FROM product_tags pt
         INNER JOIN tags t ON t.id = pt.tag_id
         WHERE pt.product_id = ?1
         ORDER BY t.id ASC;",
    )?;
    let mut rows = stmt.query([id])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        tags.push(Tag {
            id: row.get(0)?,
            tag_name: row.get(1)?,
        });
    }
    Ok(tags)
}

fn product_exists(conn: &Connection, id: ProductId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1);",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn ensure_catalog_connection_ready(conn: &Connection) -> RepoResult<()> {
    let required: [(&str, &[&str]); 4] = [
        ("categories", &["id", "category_name"]),
        ("tags", &["id", "tag_name"]),
        (
            "products",
            &["id", "product_name", "price_cents", "stock", "category_id"],
        ),
        ("product_tags", &["id", "product_id", "tag_id", "created_at"]),
    ];

    for (table, columns) in required {
        let present = table_columns(conn, table)?;
        if present.is_empty() {
            return Err(RepoError::InvalidData(format!(
                "missing required table `{table}`"
            )));
        }
        if let Some(column) = columns.iter().find(|column| !present.contains(**column)) {
            return Err(RepoError::InvalidData(format!(
                "missing required column `{table}.{column}`"
            )));
        }
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = BTreeSet::new();
    while let Some(row) = rows.next()? {
        columns.insert(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
