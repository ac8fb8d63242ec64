//! The external compiler interface.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of compiling one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub code: String,
    /// Raw import specifiers found in the source, in source order.
    pub imports: Vec<String>,
}

/// Source transform supplied by the orchestrator.
///
/// The module graph never parses source itself; it only needs the compiled
/// text and the import specifiers.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, source: &str, filename: &Path) -> anyhow::Result<CompileOutput>;

    /// Import specifiers of a file that is not itself compiled.
    ///
    /// Defaults to a full compile; override when a cheaper scan exists.
    async fn scan_imports(&self, source: &str, filename: &Path) -> anyhow::Result<Vec<String>> {
        Ok(self.compile(source, filename).await?.imports)
    }
}
