//! Error types for the dirsync core crate.

use thiserror::Error;

/// Top-level error type for all dirsync operations.
#[derive(Debug, Error)]
pub enum DirsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("identifier collision for {identifier}: {detail}")]
    IdentifierCollision { identifier: String, detail: String },

    #[error("directory unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("local write conflict: {0}")]
    LocalWriteConflict(String),

    #[error("assertion rejected: {0}")]
    AssertionRejected(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("sync already running for scope {0}")]
    SyncInProgress(String),
}

impl DirsyncError {
    /// Whether this error only invalidates the record being processed.
    ///
    /// Record-level errors are counted in a pass outcome and the pass moves on;
    /// everything else aborts the pass.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            DirsyncError::MalformedIdentifier(_)
                | DirsyncError::IdentifierCollision { .. }
                | DirsyncError::LocalWriteConflict(_)
        )
    }
}

/// A convenience Result alias that defaults to [`DirsyncError`].
pub type Result<T> = std::result::Result<T, DirsyncError>;
