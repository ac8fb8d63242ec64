//! The physical resolution primitive.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from a [`Resolve`] implementation.
///
/// [`ModuleResolver`](super::ModuleResolver) downgrades every one of these
/// to a builtin classification.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve `{request}` from {}", context.display())]
    NotFound { request: String, context: PathBuf },

    #[error("I/O error while resolving at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid package description {}: {source}", path.display())]
    Package {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of the nearest `package.json` above a resolved file.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDescription {
    /// Directory holding the `package.json`.
    pub dir: PathBuf,
    pub data: Value,
}

impl PackageDescription {
    pub fn new(dir: impl Into<PathBuf>, data: Value) -> Self {
        Self {
            dir: dir.into(),
            data,
        }
    }

    /// A top-level string field, e.g. `main`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.field("name")
    }

    /// Whether the package declares `"type": "module"`.
    pub fn is_esm(&self) -> bool {
        self.field("type") == Some("module")
    }
}

/// Output of a [`Resolve`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Absolute path of the resolved file (not yet canonicalized).
    pub filename: PathBuf,
    pub description: Option<PackageDescription>,
}

/// Turn `(context directory, request)` into a file on disk.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, context: &Path, request: &str) -> Result<Resolved, ResolveError>;
}
