//! Crate-level error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;

/// Errors surfaced to the build orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The external compiler rejected a file. The diagnostic is the source.
    #[error("failed to compile {}", filename.display())]
    Compile {
        filename: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is lock contention from a fail-fast acquisition.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Cache(e) if e.is_contention())
    }

    /// The file whose compilation failed, if this is a compile error.
    pub fn compile_filename(&self) -> Option<&std::path::Path> {
        match self {
            Self::Compile { filename, .. } => Some(filename),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
