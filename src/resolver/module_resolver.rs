//! Request → module identity, compile decision, and module format.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{FsResolve, PackageDescription, Resolve};
use crate::config::{ResolverConfig, has_extension};
use crate::debug;
use crate::fs::{FileSystem, clean_path};

const NODE_MODULES: &str = "node_modules";

/// Module format of a resolved file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Esm,
    CommonJs,
    Native,
    /// Runtime builtin or unresolvable reference; never loaded from disk.
    Builtin,
}

/// A fully classified import request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// Canonical path, or the raw request for builtins.
    pub filename: PathBuf,
    /// Resolved loader segments preceding the resource, in request order.
    pub loaders: Vec<String>,
    pub compile: bool,
    pub builtin: bool,
    pub kind: ModuleKind,
}

impl ResolvedModule {
    fn builtin(request: &str, loaders: Vec<String>) -> Self {
        Self {
            filename: PathBuf::from(request),
            loaders,
            compile: false,
            builtin: true,
            kind: ModuleKind::Builtin,
        }
    }

    /// The request with every segment resolved, loaders joined by `!`.
    pub fn request(&self) -> String {
        let resource = self.filename.to_string_lossy();
        if self.loaders.is_empty() {
            return resource.into_owned();
        }
        let mut request = self.loaders.join("!");
        request.push('!');
        request.push_str(&resource);
        request
    }
}

/// Classifies import requests.
///
/// Physical lookup is delegated to a [`Resolve`] primitive; failures there
/// never surface as errors, the request is classified as a builtin instead.
pub struct ModuleResolver {
    config: ResolverConfig,
    fs: Arc<dyn FileSystem>,
    resolve: Arc<dyn Resolve>,
}

impl ModuleResolver {
    /// Resolver backed by [`FsResolve`] over `fs`.
    pub fn new(config: ResolverConfig, fs: Arc<dyn FileSystem>) -> Self {
        let resolve = Arc::new(FsResolve::new(Arc::clone(&fs), &config));
        Self::with_resolve(config, fs, resolve)
    }

    /// Resolver with a custom physical resolution primitive.
    pub fn with_resolve(
        config: ResolverConfig,
        fs: Arc<dyn FileSystem>,
        resolve: Arc<dyn Resolve>,
    ) -> Self {
        Self {
            config,
            fs,
            resolve,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `request` as seen from the directory `context`.
    ///
    /// `a!b!./file` resolves each loader segment and the trailing resource
    /// separately. Loaders that fail to resolve are kept verbatim.
    pub async fn resolve(&self, context: &Path, request: &str) -> ResolvedModule {
        let mut segments: Vec<&str> = request.split('!').filter(|s| !s.is_empty()).collect();
        let resource = segments.pop().unwrap_or_default();

        let mut loaders = Vec::with_capacity(segments.len());
        for loader in segments {
            let resolved = match self.locate(context, loader).await {
                Some((filename, _)) => filename.to_string_lossy().into_owned(),
                None => loader.to_string(),
            };
            loaders.push(resolved);
        }

        if resource.is_empty() || self.config.is_builtin(resource) {
            return ResolvedModule::builtin(resource, loaders);
        }

        let Some((filename, description)) = self.locate(context, resource).await else {
            debug!("resolve"; "treating `{}` as external", resource);
            return ResolvedModule::builtin(resource, loaders);
        };

        let compile = self.should_compile(&filename);
        let kind = self.module_kind(&filename, description.as_ref()).await;
        ResolvedModule {
            filename,
            loaders,
            compile,
            builtin: false,
            kind,
        }
    }

    /// Physical resolution plus symlink canonicalization.
    async fn locate(
        &self,
        context: &Path,
        request: &str,
    ) -> Option<(PathBuf, Option<PackageDescription>)> {
        let resolved = match self.resolve.resolve(context, request).await {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("resolve"; "{}", e);
                return None;
            }
        };
        let filename = self.canonical(&resolved.filename).await;
        Some((filename, resolved.description))
    }

    async fn canonical(&self, path: &Path) -> PathBuf {
        self.fs
            .canonicalize(path)
            .await
            .unwrap_or_else(|_| clean_path(path))
    }

    /// Whether `filename` goes through the compiler or is passed through.
    ///
    /// ```text
    /// force_compile ext       → compile
    /// ext not passthrough     → compile
    /// no compilation root     → pass
    /// root, no node_modules   → compile
    /// root inside node_modules → compile, otherwise pass
    /// ```
    pub fn should_compile(&self, filename: &Path) -> bool {
        if self.config.is_force_compile(filename) || !self.config.is_passthrough(filename) {
            return true;
        }

        let Some(root) = self.nearest_root(filename) else {
            return false;
        };
        match nearest_node_modules(filename) {
            None => true,
            Some(modules) => root != modules && root.starts_with(modules),
        }
    }

    /// The deepest compilation root enclosing `filename`.
    fn nearest_root(&self, filename: &Path) -> Option<&Path> {
        self.config
            .compilation_roots
            .iter()
            .map(PathBuf::as_path)
            .filter(|root| filename.starts_with(root))
            .max_by_key(|root| root.components().count())
    }

    async fn module_kind(
        &self,
        filename: &Path,
        description: Option<&PackageDescription>,
    ) -> ModuleKind {
        let config = &self.config;
        if has_extension(&config.esm_extensions, filename) {
            return ModuleKind::Esm;
        }
        if has_extension(&config.cjs_extensions, filename) {
            return ModuleKind::CommonJs;
        }
        if has_extension(&config.native_extensions, filename) {
            return ModuleKind::Native;
        }

        let Some(desc) = description else {
            return ModuleKind::CommonJs;
        };
        if desc.is_esm() || self.is_module_entry(filename, desc).await {
            ModuleKind::Esm
        } else {
            ModuleKind::CommonJs
        }
    }

    /// Whether `filename` is the package's `module` entry.
    async fn is_module_entry(&self, filename: &Path, desc: &PackageDescription) -> bool {
        let Some(entry) = desc.field("module") else {
            return false;
        };
        let entry = clean_path(&desc.dir.join(entry));
        if self.canonical(&entry).await == filename {
            return true;
        }
        for ext in &self.config.extensions {
            let mut candidate = entry.as_os_str().to_owned();
            candidate.push(ext);
            if self.canonical(Path::new(&candidate)).await == filename {
                return true;
            }
        }
        false
    }
}

/// The deepest `node_modules` directory enclosing `filename`.
fn nearest_node_modules(filename: &Path) -> Option<&Path> {
    filename
        .ancestors()
        .skip(1)
        .find(|dir| dir.file_name().is_some_and(|name| name == NODE_MODULES))
}
