//! Association store contract and SQLite adapter for `product_tags`.
//!
//! # Responsibility
//! - Read every join row of one owning product.
//! - Insert and delete join rows in batches, split into as few statements
//!   as the bind-variable limit allows.
//! - Classify SQLite failures into conflict, constraint and transport errors.
//!
//! # Invariants
//! - `fetch_current` returns an empty list for owners without links.
//! - Each batch is all-or-nothing, including batches that span several
//!   statements.
//! - Deleting unknown association ids is not an error.

use crate::db::DbError;
use crate::model::association::{AssociationId, AssociationRow, NewAssociation};
use crate::model::product::ProductId;
use log::warn;
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Bound variables per statement; the compile-time default of older
/// SQLite builds, below the bundled limit.
const MAX_BIND_VARIABLES: usize = 999;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by an association store.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite transport or execution failure.
    Db(DbError),
    /// Another writer holds the data this call needs.
    Conflict(String),
    /// Duplicate link or missing product/tag reference.
    Constraint(String),
    /// Store could not be reached.
    Unavailable(String),
    /// Persisted row has an unexpected shape.
    InvalidData(String),
}

impl StoreError {
    /// True when retrying after backoff may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict(message) => write!(f, "write conflict: {message}"),
            Self::Constraint(message) => write!(f, "constraint violation: {message}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted association: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        let code = match &value {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::Conflict(value.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => Self::Constraint(value.to_string()),
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

/// Persistence contract used by the reconciler.
pub trait AssociationStore {
    /// Returns all join rows for `owner_id`, ordered by association id.
    fn fetch_current(&self, owner_id: ProductId) -> StoreResult<Vec<AssociationRow>>;
    /// Creates one row per pair and returns the new association ids.
    fn insert_batch(&mut self, rows: &[NewAssociation]) -> StoreResult<Vec<AssociationId>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let rows_per_statement = MAX_BIND_VARIABLES / 2;
        let conn = self.conn;
        let mut inserted = all_or_nothing(conn, rows.len() > rows_per_statement, || {
            let mut inserted = Vec::with_capacity(rows.len());
            for chunk in rows.chunks(rows_per_statement) {
                insert_chunk(conn, chunk, &mut inserted)?;
            }
            Ok(inserted)
        })?;
        inserted.sort_unstable();
        Ok(inserted)
    }

    fn delete_batch(&mut self, association_ids: &BTreeSet<AssociationId>) -> StoreResult<usize> {
        if association_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<AssociationId> = association_ids.iter().copied().collect();
        let conn = self.conn;
        all_or_nothing(conn, ids.len() > MAX_BIND_VARIABLES, || {
            let mut deleted = 0;
            for chunk in ids.chunks(MAX_BIND_VARIABLES) {
                let sql = format!(
                    "DELETE FROM product_tags WHERE id IN ({});",
                    placeholder_groups(chunk.len(), 1)
                );
                deleted += conn.execute(&sql, params_from_iter(chunk))?;
            }
            Ok(deleted)
        })
    }
}

fn insert_chunk(
    conn: &Connection,
    rows: &[NewAssociation],
    inserted: &mut Vec<AssociationId>,
) -> StoreResult<()> {
    let sql = format!(
        "INSERT INTO product_tags (product_id, tag_id) VALUES {} RETURNING id;",
        placeholder_groups(rows.len(), 2)
    );
    let binds = rows.iter().flat_map(|row| [row.owner_id, row.target_id]);
    let mut stmt = conn.prepare(&sql)?;
    let mut returned = stmt.query(params_from_iter(binds))?;
    while let Some(row) = returned.next()? {
        inserted.push(row.get::<_, AssociationId>(0)?);
    }
    Ok(())
}

/// Runs a batch that spans several statements under a savepoint, so a
/// failing statement also undoes the ones before it.
fn all_or_nothing<T>(
    conn: &Connection,
    spans_statements: bool,
    work: impl FnOnce() -> StoreResult<T>,
) -> StoreResult<T> {
    if !spans_statements {
        return work();
    }

    conn.execute_batch("SAVEPOINT association_batch;")?;
    match work() {
        Ok(value) => {
            conn.execute_batch("RELEASE association_batch;")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = conn
                .execute_batch("ROLLBACK TO association_batch; RELEASE association_batch;")
            {
                warn!(
                    "event=association_batch module=repo status=error phase=rollback error={rollback_err}"
                );
            }
            Err(err)
        }
    }
}

fn parse_association_row(row: &Row<'_>) -> StoreResult<AssociationRow> {
    let association = AssociationRow {
        association_id: row.get("id")?,
        owner_id: row.get("product_id")?,
        target_id: row.get("tag_id")?,
        created_at: row.get("created_at")?,
    };
    if association.created_at < 0 {
        return Err(StoreError::InvalidData(format!(
            "negative created_at `{}` in product_tags.id={}",
            association.created_at, association.association_id
        )));
    }
    Ok(association)
}

/// Builds `?` (width 1) or `(?, ?)` groups joined by commas.
fn placeholder_groups(count: usize, width: usize) -> String {
    let group = if width == 1 {
        "?".to_string()
    } else {
        format!("({})", vec!["?"; width].join(", "))
    };
    vec![group; count].join(", ")
}
