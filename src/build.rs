//! Wiring for orchestrators: one [`Build`] per project, one factory per pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::log;
use crate::module::{Compiler, Module, ModuleContext, ModuleFactory, context_of};
use crate::resolver::{ModuleResolver, Resolve};

/// Long-lived build state: cache, resolver and module registry.
pub struct Build {
    config: BuildConfig,
    fs: Arc<dyn FileSystem>,
    cache: Cache,
    resolver: Arc<ModuleResolver>,
    compiler: Arc<dyn Compiler>,
    context: ModuleContext,
}

impl Build {
    pub fn new(config: BuildConfig, fs: Arc<dyn FileSystem>, compiler: Arc<dyn Compiler>) -> Self {
        let cache = Cache::new(&config.cache.root, config.cache.layout, Arc::clone(&fs));
        let resolver = Arc::new(ModuleResolver::new(config.resolver.clone(), Arc::clone(&fs)));
        let context = ModuleContext::new(&cache);
        Self {
            config,
            fs,
            cache,
            resolver,
            compiler,
            context,
        }
    }

    /// Replace the physical resolution primitive.
    pub fn with_resolve(mut self, resolve: Arc<dyn Resolve>) -> Self {
        self.resolver = Arc::new(ModuleResolver::with_resolve(
            self.config.resolver.clone(),
            Arc::clone(&self.fs),
            resolve,
        ));
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    /// A factory for one build pass.
    pub fn factory(&self) -> ModuleFactory {
        ModuleFactory::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.compiler),
            Arc::clone(&self.fs),
            &self.cache,
        )
    }

    /// Require every entry file, then persist the records of the pass.
    ///
    /// Entries that resolve to builtins are skipped.
    pub async fn pass(&self, entries: &[PathBuf]) -> Result<Vec<Arc<Module>>> {
        let factory = self.factory();
        let mut modules = Vec::with_capacity(entries.len());

        for entry in entries {
            let request = entry.to_string_lossy();
            if let Some(module) = self
                .context
                .require(&factory, &context_of(entry), &request)
                .await?
            {
                modules.push(module);
            }
        }

        self.context.persist_all().await;
        log!("build"; "{} entries, {} modules loaded", entries.len(), self.context.loaded_count());
        Ok(modules)
    }

    /// Delete the whole cache root.
    pub async fn clean(&self) -> Result<()> {
        self.cache.clean().await.map_err(Error::from)
    }

    /// Root directory of the persisted cache.
    pub fn cache_root(&self) -> &Path {
        self.cache.root()
    }
}
