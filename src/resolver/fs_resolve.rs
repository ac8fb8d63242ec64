//! Default [`Resolve`] over a [`FileSystem`].
//!
//! ```text
//! ./a, ../a, /a   →  <context>/a, then <context>/a<ext>, then directory entry
//! pkg, pkg/sub    →  <dir>/node_modules/pkg[/sub] for each ancestor <dir>
//!
//! directory entry →  package.json main_fields (in order), then index<ext>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{PackageDescription, Resolve, ResolveError, Resolved};
use crate::config::ResolverConfig;
use crate::fs::{FileSystem, clean_path};

const PACKAGE_JSON: &str = "package.json";
const NODE_MODULES: &str = "node_modules";

/// Node-style file resolution with extension probing.
pub struct FsResolve {
    fs: Arc<dyn FileSystem>,
    extensions: Vec<String>,
    main_fields: Vec<String>,
}

impl FsResolve {
    pub fn new(fs: Arc<dyn FileSystem>, config: &ResolverConfig) -> Self {
        Self {
            fs,
            extensions: config.extensions.clone(),
            main_fields: config.main_fields.clone(),
        }
    }

    /// `path` itself, or `path` with one of the configured extensions.
    async fn resolve_file(&self, path: &Path) -> Option<PathBuf> {
        if self.fs.is_file(path).await {
            return Some(path.to_path_buf());
        }
        for ext in &self.extensions {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            if self.fs.is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        for ext in &self.extensions {
            let candidate = dir.join(format!("index{ext}"));
            if self.fs.is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    /// Entry point of a directory: package fields first, then `index`.
    async fn resolve_dir(&self, dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
        if let Some(desc) = self.read_description(dir).await? {
            for field in &self.main_fields {
                let Some(entry) = desc.field(field) else {
                    continue;
                };
                let target = clean_path(&dir.join(entry));
                if let Some(found) = self.resolve_file(&target).await {
                    return Ok(Some(found));
                }
                if let Some(found) = self.resolve_index(&target).await {
                    return Ok(Some(found));
                }
            }
        }
        Ok(self.resolve_index(dir).await)
    }

    async fn resolve_path(&self, path: &Path) -> Result<Option<PathBuf>, ResolveError> {
        if let Some(found) = self.resolve_file(path).await {
            return Ok(Some(found));
        }
        self.resolve_dir(path).await
    }

    /// Read `<dir>/package.json`, if present.
    async fn read_description(
        &self,
        dir: &Path,
    ) -> Result<Option<PackageDescription>, ResolveError> {
        let path = dir.join(PACKAGE_JSON);
        if !self.fs.is_file(&path).await {
            return Ok(None);
        }
        let content = self
            .fs
            .read_to_string(&path)
            .await
            .map_err(|source| ResolveError::Io {
                path: path.clone(),
                source,
            })?;
        let data = serde_json::from_str(&content)
            .map_err(|source| ResolveError::Package { path, source })?;
        Ok(Some(PackageDescription::new(dir, data)))
    }

    /// Nearest `package.json` at or above the directory of `file`.
    async fn find_description(
        &self,
        file: &Path,
    ) -> Result<Option<PackageDescription>, ResolveError> {
        for dir in file.ancestors().skip(1) {
            if let Some(desc) = self.read_description(dir).await? {
                return Ok(Some(desc));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Resolve for FsResolve {
    async fn resolve(&self, context: &Path, request: &str) -> Result<Resolved, ResolveError> {
        let found = if is_path_request(request) {
            self.resolve_path(&clean_path(&context.join(request)))
                .await?
        } else {
            let mut found = None;
            for dir in context.ancestors() {
                if dir.file_name().is_some_and(|name| name == NODE_MODULES) {
                    continue;
                }
                let candidate = dir.join(NODE_MODULES).join(request);
                if let Some(hit) = self.resolve_path(&candidate).await? {
                    found = Some(hit);
                    break;
                }
            }
            found
        };

        let filename = found.ok_or_else(|| ResolveError::NotFound {
            request: request.to_string(),
            context: context.to_path_buf(),
        })?;
        let description = self.find_description(&filename).await?;
        Ok(Resolved {
            filename,
            description,
        })
    }
}

/// Relative or absolute requests, as opposed to bare package names.
fn is_path_request(request: &str) -> bool {
    request.starts_with('/')
        || request.starts_with("./")
        || request.starts_with("../")
        || request == "."
        || request == ".."
}
