//! Error types for course-flux

use thiserror::Error;

/// Errors that can occur while building features and labels
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Unknown action label: {0}")]
    UnknownAction(String),

    #[error("Target action '{0}' does not occur in the interaction log")]
    TargetActionAbsent(String),

    #[error("{stage} dropped users: expected {expected}, got {actual}")]
    UsersDropped {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Row count mismatch: features have {features} rows, labels have {labels}")]
    RowCountMismatch { features: usize, labels: usize },

    #[error("Index mismatch: {0}")]
    IndexMismatch(String),

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Recoverable problems with an on-disk cache.
///
/// Every variant means "recompute"; none of them is fatal on its own.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {0} does not exist")]
    Missing(String),

    #[error("cache key mismatch: expected {expected}, found {found}")]
    Stale { expected: String, found: String },

    #[error("cache archive is unreadable: {0}")]
    Corrupt(String),

    #[error("cache schema drift: {0}")]
    SchemaDrift(String),
}

impl From<zip::result::ZipError> for CacheError {
    fn from(e: zip::result::ZipError) -> Self {
        CacheError::Corrupt(e.to_string())
    }
}
