//! Catalog database bootstrap.
//!
//! # Responsibility
//! - Hand out connections whose settings the reconciler relies on:
//!   enforced foreign keys (join rows cascade) and a bounded busy wait
//!   (lock expiry surfaces as a conflict instead of hanging).
//! - Bring the catalog schema to the version this build understands.
//!
//! # Invariants
//! - A connection is returned only after every setting and migration step
//!   succeeded.
//! - Each failure names the bootstrap stage that produced it.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure while opening, configuring or migrating a catalog database.
#[derive(Debug)]
pub enum DbError {
    /// The file or in-memory database could not be opened.
    Open(rusqlite::Error),
    /// A required connection setting could not be applied.
    Setting {
        setting: &'static str,
        source: rusqlite::Error,
    },
    /// `PRAGMA foreign_keys` did not take effect, so deletes would not
    /// cascade to `product_tags`.
    ForeignKeysUnavailable,
    /// A schema step failed; the database keeps its previous version.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The database was written by a newer catalog build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Any other statement failure.
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Stable metadata code for log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Open(_) => "db_open_failed",
            Self::Setting { .. } => "db_setting_failed",
            Self::ForeignKeysUnavailable => "foreign_keys_unavailable",
            Self::Migration { .. } => "db_migration_failed",
            Self::UnsupportedSchemaVersion { .. } => "unsupported_schema_version",
            Self::Sqlite(_) => "sqlite_error",
        }
    }

    pub(crate) fn setting(setting: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Setting { setting, source }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(err) => write!(f, "cannot open catalog database: {err}"),
            Self::Setting { setting, source } => {
                write!(f, "cannot apply connection setting `{setting}`: {source}")
            }
            Self::ForeignKeysUnavailable => {
                write!(f, "sqlite build does not enforce foreign keys")
            }
            Self::Migration { version, source } => {
                write!(f, "catalog schema step {version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "catalog schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open(err) | Self::Sqlite(err) => Some(err),
            Self::Setting { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::ForeignKeysUnavailable | Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
