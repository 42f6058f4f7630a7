//! Error types for optikv operations.

use thiserror::Error;

/// Backend adapter errors.
///
/// These never escape a cache data operation: the adapter boundary absorbs
/// them, logs, and converts the result to "absent". They are visible to
/// callers only through `CacheError::Backend` when a cache fails to open.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("backend {op} failed for key {key:?}: {reason}")]
    OperationFailed {
        op: &'static str,
        key: String,
        reason: String,
    },

    #[error("corrupt record for key {key:?}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Shorthand for an operation failure on a single key.
    pub fn op(op: &'static str, key: impl Into<String>, reason: impl ToString) -> Self {
        Self::OperationFailed {
            op,
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the cache public surface.
///
/// `TypeMismatch` is the only error a data operation may return; all other
/// failures resolve to safe defaults. `Backend` can occur only while
/// opening a cache, when even the fallback store cannot start.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("merge requires an object value for key {key:?}, found {found}")]
    TypeMismatch { key: String, found: &'static str },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for backend adapter operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
