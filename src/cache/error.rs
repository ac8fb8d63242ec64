//! Cache error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockError;

/// Errors raised by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `get`/`modified` on a key that was never `set` (or was removed).
    #[error("cache entry not found: {key}")]
    NotFound { key: String },

    /// A scoped operation touched a key its scope does not hold.
    ///
    /// This is a bug in the caller, not a data condition: do not retry.
    #[error("no lock for {key}")]
    NoLock { key: String },

    /// A fail-fast lock found its key held by another chain.
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cache record `{key}`: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is lock contention from a fail-fast acquisition.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Lock(LockError::Contention { .. }))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
