//! Error taxonomy for Ortelius.
//!
//! Every externally visible failure carries a stable kind plus a
//! human-readable message. Validation errors are rejected before any work
//! begins; store errors abort the current operation but leave per-file
//! committed progress valid.

use thiserror::Error;

/// Errors surfaced by the graph store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be opened or the connection failed mid-operation
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A unique constraint or schema invariant was violated
    #[error("store constraint violated: {0}")]
    Constraint(String),

    /// A query failed to execute or returned malformed rows
    #[error("store query failed: {0}")]
    Query(String),

    /// Node payload could not be serialized or deserialized
    #[error("store payload invalid: {0}")]
    Payload(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(err.to_string())
            }
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::CannotOpen =>
            {
                StoreError::Connection(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Payload(err.to_string())
    }
}

/// Top-level error type for all engine operations.
///
/// The variant is the stable error kind; the message is for humans.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input or out-of-range parameters. Never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Unknown repository, file, or task.
    #[error("not found: {0}")]
    NotFound(String),

    /// Graph store failure. Aborts the current operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Unreadable source file or unusable source tree.
    ///
    /// For individual files during scanning this is recorded and skipped;
    /// for the incremental-mode precondition it fails the whole task.
    #[error("source read error: {0}")]
    SourceRead(String),

    /// Operation stopped at a cooperative cancellation checkpoint.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl EngineError {
    /// Stable machine-readable kind string for task results and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Store(_) => "store",
            EngineError::SourceRead(_) => "source_read",
            EngineError::Cancelled(_) => "cancelled",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(EngineError::Validation("x".into()).kind(), "validation");
        assert_eq!(EngineError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            EngineError::Store(StoreError::Query("x".into())).kind(),
            "store"
        );
        assert_eq!(EngineError::SourceRead("x".into()).kind(), "source_read");
        assert_eq!(EngineError::Cancelled("x".into()).kind(), "cancelled");
    }

    #[test]
    fn test_store_error_maps_into_engine_error() {
        let store = StoreError::Constraint("duplicate file key".into());
        let engine: EngineError = store.into();
        assert_eq!(engine.kind(), "store");
        assert!(engine.to_string().contains("duplicate file key"));
    }
}
