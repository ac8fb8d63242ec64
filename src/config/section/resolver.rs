//! `[resolver]` section configuration.
//!
//! Controls how import requests map to files and which files get compiled.
//!
//! # Example
//!
//! ```toml
//! [resolver]
//! extensions = [".js", ".mjs", ".cjs", ".jsx", ".ts", ".tsx", ".json"]
//! passthrough = [".js", ".mjs", ".cjs", ".json"]    # Copied verbatim unless first-party
//! force_compile = [".jsx", ".ts", ".tsx"]           # Always compiled
//! compilation_roots = ["src"]                       # First-party source directories
//! esm_extensions = [".mjs"]
//! cjs_extensions = [".cjs"]
//! native_extensions = [".node"]
//! main_fields = ["module", "main"]                  # package.json entry preference
//! builtins = ["fs", "path", "http"]                 # Never resolved on disk
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Module resolution and compile-decision settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Extensions probed, in order, for extensionless requests.
    pub extensions: Vec<String>,

    /// Extensions that may be served without compiling.
    pub passthrough: Vec<String>,

    /// Extensions that are always compiled.
    pub force_compile: Vec<String>,

    /// Directories whose files are compiled even when pass-through.
    pub compilation_roots: Vec<PathBuf>,

    pub esm_extensions: Vec<String>,
    pub cjs_extensions: Vec<String>,
    pub native_extensions: Vec<String>,

    /// `package.json` fields consulted for a package entry, in order.
    pub main_fields: Vec<String>,

    /// Requests treated as runtime builtins.
    pub builtins: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            extensions: strings(&[".js", ".mjs", ".cjs", ".jsx", ".ts", ".tsx", ".json"]),
            passthrough: strings(&[".js", ".mjs", ".cjs", ".json"]),
            force_compile: strings(&[".jsx", ".ts", ".tsx"]),
            compilation_roots: Vec::new(),
            esm_extensions: strings(&[".mjs"]),
            cjs_extensions: strings(&[".cjs"]),
            native_extensions: strings(&[".node"]),
            main_fields: strings(&["module", "main"]),
            builtins: strings(&[
                "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https",
                "module", "net", "os", "path", "stream", "url", "util", "zlib",
            ]),
        }
    }
}

impl ResolverConfig {
    /// Whether `request` names a builtin, with or without a `node:` prefix.
    pub fn is_builtin(&self, request: &str) -> bool {
        let name = request.strip_prefix("node:").unwrap_or(request);
        request.starts_with("node:") || self.builtins.iter().any(|b| b == name)
    }

    pub fn is_passthrough(&self, path: &Path) -> bool {
        has_extension(&self.passthrough, path)
    }

    pub fn is_force_compile(&self, path: &Path) -> bool {
        has_extension(&self.force_compile, path)
    }
}

/// Extension of `path` with its leading dot, e.g. `.js`.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
}

/// Whether the extension of `path` is listed in `list`.
pub fn has_extension(list: &[String], path: &Path) -> bool {
    dotted_extension(path).is_some_and(|ext| list.iter().any(|e| *e == ext))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
