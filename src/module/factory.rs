//! Per-pass resolution and compile memoization.
//!
//! Compiled output lives in the `compile` cache namespace:
//!
//! ```text
//! <root>/compile/<filename>               compiled code
//! <root>/compile/<filename>.stats         {"mtime": <source mtime>}
//! <root>/compile/<filename>.imports.json  raw import specifiers
//! ```
//!
//! An entry is fresh while its recorded mtime equals the source's current
//! mtime and the import manifest exists. Pass-through files get a manifest
//! only, written the first time their imports are scanned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CompileOutput, Compiler};
use crate::cache::{Cache, CacheError, ScopedCache};
use crate::debug;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, Mtime};
use crate::resolver::{ModuleResolver, ResolvedModule};

/// Cache namespace for compiled output.
pub const COMPILE_NAMESPACE: &str = "compile";

/// Suffix of the import manifest stored beside compiled code.
pub const IMPORTS_SUFFIX: &str = ".imports.json";

/// Raw source of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub code: String,
    pub mtime: Mtime,
}

/// Output of [`ModuleFactory::compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    pub code: String,
    pub imports: Vec<String>,
    /// Source mtime the output corresponds to.
    pub mtime: Mtime,
    /// Served from the compile cache without invoking the compiler.
    pub cached: bool,
}

/// Per-pass façade over resolution, loading and compilation.
pub struct ModuleFactory {
    resolver: Arc<ModuleResolver>,
    compiler: Arc<dyn Compiler>,
    fs: Arc<dyn FileSystem>,
    cache: Cache,
}

impl ModuleFactory {
    /// `cache` is the root cache; compiled output goes to its `compile` namespace.
    pub fn new(
        resolver: Arc<ModuleResolver>,
        compiler: Arc<dyn Compiler>,
        fs: Arc<dyn FileSystem>,
        cache: &Cache,
    ) -> Self {
        Self {
            resolver,
            compiler,
            fs,
            cache: cache.create(COMPILE_NAMESPACE),
        }
    }

    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// The compile cache namespace.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub async fn resolve(&self, context: &Path, request: &str) -> ResolvedModule {
        self.resolver.resolve(context, request).await
    }

    /// Resolve every import of `filename`, relative to its directory.
    ///
    /// With `recurse`, a pass-through dependency whose own imports need
    /// compiling is switched to compiled. Only one level is inspected.
    pub async fn resolve_imports(
        &self,
        filename: &Path,
        imports: &[String],
        recurse: bool,
    ) -> Vec<ResolvedModule> {
        let context = context_of(filename);
        let mut resolved = Vec::with_capacity(imports.len());

        for request in imports {
            let mut module = self.resolve(&context, request).await;
            if recurse && !module.compile && !module.builtin {
                module.compile = self.imports_need_compile(&module.filename).await;
            }
            resolved.push(module);
        }
        resolved
    }

    async fn imports_need_compile(&self, filename: &Path) -> bool {
        let imports = match self.scan_imports(filename).await {
            Ok(imports) => imports,
            Err(e) => {
                debug!("module"; "scan of {} failed: {}", filename.display(), e);
                return false;
            }
        };
        let context = context_of(filename);
        for request in &imports {
            let dep = self.resolve(&context, request).await;
            if dep.compile {
                return true;
            }
        }
        false
    }

    /// Import specifiers of a file, memoized in its import manifest.
    ///
    /// The manifest is reused while its recorded mtime matches the source.
    pub async fn scan_imports(&self, filename: &Path) -> Result<Vec<String>> {
        let (_, manifest) = keys(filename);
        let manifest = &manifest;
        self.cache
            .lock([manifest], |scope| async move {
                let mtime = self.source_mtime(filename).await?;
                if scope.has(manifest).await? && scope.modified(manifest).await? == mtime {
                    return Ok(scope.get_json(manifest).await?);
                }

                let source = self.load(filename).await?;
                let imports = self
                    .compiler
                    .scan_imports(&source.code, filename)
                    .await
                    .map_err(|source| Error::Compile {
                        filename: filename.to_path_buf(),
                        source,
                    })?;
                scope.set_json(manifest, &imports, source.mtime).await?;
                debug!("module"; "scanned {}", filename.display());
                Ok(imports)
            })
            .await
    }

    /// Read the source text and its current mtime.
    pub async fn load(&self, filename: &Path) -> Result<Source> {
        let mtime = self.source_mtime(filename).await?;
        let code = self
            .fs
            .read_to_string(filename)
            .await
            .map_err(|e| Error::io(filename, e))?;
        Ok(Source { code, mtime })
    }

    pub async fn source_mtime(&self, filename: &Path) -> Result<Mtime> {
        self.fs
            .stat(filename)
            .await
            .map(|stat| stat.mtime)
            .map_err(|e| Error::io(filename, e))
    }

    /// Compile a resolved module, reusing cached output while it is fresh.
    ///
    /// Pass-through modules are loaded verbatim and report no imports.
    pub async fn compile(&self, module: &ResolvedModule) -> Result<Compiled> {
        let filename = module.filename.as_path();
        if !module.compile {
            let source = self.load(filename).await?;
            return Ok(Compiled {
                code: source.code,
                imports: Vec::new(),
                mtime: source.mtime,
                cached: false,
            });
        }

        let (key, manifest) = keys(filename);
        let (key, manifest) = (&key, &manifest);
        self.cache
            .lock([key, manifest], |scope| async move {
                let mtime = self.source_mtime(filename).await?;
                if let Some(hit) = Self::lookup(&scope, filename, mtime).await? {
                    debug!("module"; "compile cache hit {}", filename.display());
                    return Ok(hit);
                }

                let source = self.load(filename).await?;
                let CompileOutput { code, imports } = self
                    .compiler
                    .compile(&source.code, filename)
                    .await
                    .map_err(|source| Error::Compile {
                        filename: filename.to_path_buf(),
                        source,
                    })?;

                scope.set(key, &code, source.mtime).await?;
                scope.set_json(manifest, &imports, source.mtime).await?;
                debug!("module"; "compiled {}", filename.display());

                Ok(Compiled {
                    code,
                    imports,
                    mtime: source.mtime,
                    cached: false,
                })
            })
            .await
    }

    /// Cached output for `filename` if it matches `mtime`.
    async fn lookup(
        scope: &ScopedCache,
        filename: &Path,
        mtime: Mtime,
    ) -> std::result::Result<Option<Compiled>, CacheError> {
        let (key, manifest) = keys(filename);
        if !scope.has(&key).await? || !scope.has(&manifest).await? {
            return Ok(None);
        }
        match scope.modified(&key).await {
            Ok(recorded) if recorded == mtime => {}
            Ok(_) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }
        let code = scope.get_string(&key).await?;
        let imports: Vec<String> = scope.get_json(&manifest).await?;
        Ok(Some(Compiled {
            code,
            imports,
            mtime,
            cached: true,
        }))
    }

    /// Cached output for `filename`, fresh or not.
    pub async fn get_compile_cache(&self, filename: &Path) -> Result<Option<Compiled>> {
        let (key, manifest) = keys(filename);
        let (key, manifest) = (&key, &manifest);
        let entry = self
            .cache
            .read_lock([key, manifest], |scope| async move {
                if !scope.has(key).await? || !scope.has(manifest).await? {
                    return Ok::<_, CacheError>(None);
                }
                let mtime = scope.modified(key).await?;
                Self::lookup(&scope, filename, mtime).await
            })
            .await?;
        Ok(entry)
    }

    /// Whether cached output exists and matches the source's current mtime.
    pub async fn is_fresh(&self, filename: &Path) -> Result<bool> {
        let Ok(mtime) = self.source_mtime(filename).await else {
            return Ok(false);
        };
        Ok(self
            .get_compile_cache(filename)
            .await?
            .is_some_and(|entry| entry.mtime == mtime))
    }

    /// Drop cached output and manifest so the next compile runs the compiler.
    pub async fn purge(&self, filename: &Path) -> Result<()> {
        let (key, manifest) = keys(filename);
        let (key, manifest) = (&key, &manifest);
        self.cache
            .lock([key, manifest], |scope| async move {
                scope.remove(key).await?;
                scope.remove(manifest).await
            })
            .await?;
        debug!("module"; "purged compile cache of {}", filename.display());
        Ok(())
    }
}

/// Cache keys of the compiled code and its import manifest.
fn keys(filename: &Path) -> (String, String) {
    let key = filename.to_string_lossy().into_owned();
    let manifest = format!("{key}{IMPORTS_SUFFIX}");
    (key, manifest)
}

/// Directory used as resolution context for imports of `filename`.
pub fn context_of(filename: &Path) -> PathBuf {
    filename
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}
