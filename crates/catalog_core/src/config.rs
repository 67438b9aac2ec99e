//! Runtime configuration for storage and logging.
//!
//! # Responsibility
//! - Hold typed knobs consumed by `db::open_db*`, product repositories and
//!   `logging::init_logging`.
//! - Provide defaults that match production behavior.
//!
//! # Invariants
//! - `busy_timeout` bounds every statement's wait on the SQLite write lock.
//! - `ReconcileMode::Transactional` is the default reconciliation mode.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_LOG_FILES: usize = 5;

/// How tag reconciliation writes are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Fetch, insert and delete run inside one `BEGIN IMMEDIATE` transaction.
    /// Any failure rolls back both writes.
    #[default]
    Transactional,
    /// Each statement commits on its own. A failure between the two writes
    /// is reported as a partial reconciliation.
    IndependentBatches,
}

/// Storage configuration shared by connection bootstrap and repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum wait for a locked database before a statement fails.
    pub busy_timeout: Duration,
    /// Write strategy for association reconciliation.
    pub reconcile_mode: ReconcileMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            reconcile_mode: ReconcileMode::default(),
        }
    }
}

impl StoreConfig {
    /// Returns a copy using the given reconciliation mode.
    pub fn with_reconcile_mode(mut self, mode: ReconcileMode) -> Self {
        self.reconcile_mode = mode;
        self
    }

    /// Returns a copy using the given busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// File logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error` (case-insensitive).
    pub level: String,
    /// Absolute directory receiving rolling log files.
    pub log_dir: PathBuf,
    /// Size threshold that triggers rotation.
    pub max_file_bytes: u64,
    /// Number of rotated files kept on disk.
    pub max_files: usize,
}

impl LoggingConfig {
    /// Builds a config with default rotation limits.
    pub fn new(level: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.into(),
            max_file_bytes: DEFAULT_MAX_LOG_FILE_SIZE_BYTES,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}
