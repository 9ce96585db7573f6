mod schema;
mod models;

pub use schema::Database;
pub use models::ProcessedRecord;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open dedup store at {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("dedup store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("dedup store lock poisoned")]
    Poisoned,
}

/// Persisted set of processed paper identifiers.
///
/// Grows monotonically: there is no delete or expiry. Errors must reach the
/// caller so a broken store stops the run instead of treating every paper as new.
pub trait DedupStore: Send + Sync {
    fn has(&self, paper_id: &str) -> Result<bool, StoreError>;

    /// Insert-if-absent. Calling twice for the same id is not an error.
    fn mark_processed(&self, paper_id: &str) -> Result<(), StoreError>;
}
