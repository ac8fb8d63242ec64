//! The cross-pass module registry.
//!
//! ```text
//! require(A)
//!   ├─ A loaded?          refresh A (own mtime, then dependencies) → reuse
//!   ├─ queue.lock(A)      one builder per file
//!   ├─ stale records?     purge A's compile cache
//!   └─ create(A)
//!        ├─ compile       (factory, memoized)
//!        ├─ ready         (previous record)
//!        ├─ for each import B:
//!        │    queue.try_lock(B)  busy → link A→B only
//!        │    create(B)          recursively
//!        │    link A→B
//!        └─ loaded += A   (unless evicted meanwhile)
//! ```
//!
//! Nested requires never wait on the queue: a dependency being built by
//! another chain (or by an ancestor in this one) is linked but not awaited.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tokio::sync::broadcast;

use super::{DependencyGraph, Module, ModuleFactory, ModuleRecord};
use crate::cache::Cache;
use crate::debug;
use crate::error::Result;
use crate::fs::Mtime;
use crate::lock::KeyedMutex;
use crate::resolver::ResolvedModule;

/// Cache namespace for persisted module records.
pub const MODULES_NAMESPACE: &str = "modules";

const EVENT_CAPACITY: usize = 256;

/// Options for [`ModuleContext::evict`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictOptions {
    /// Also drop cached compiled output, forcing a recompile.
    pub recompile: bool,
}

impl EvictOptions {
    pub fn recompile() -> Self {
        Self { recompile: true }
    }
}

/// Notifications for collaborators holding their own module references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Evicted { filename: PathBuf, recompile: bool },
}

/// Incremental-build view of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMeta {
    pub dependencies: Vec<PathBuf>,
    pub dependents: Vec<PathBuf>,
    pub mtime: Mtime,
}

/// Registry of modules across build passes.
pub struct ModuleContext {
    cache: Cache,
    queue: KeyedMutex,
    /// In-flight and completed modules.
    modules: DashMap<PathBuf, Arc<Module>>,
    /// Completed modules only.
    loaded: DashMap<PathBuf, Arc<Module>>,
    graph: RwLock<DependencyGraph>,
    events: broadcast::Sender<ModuleEvent>,
}

impl ModuleContext {
    /// Records go to the `modules` namespace of `cache`.
    pub fn new(cache: &Cache) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cache: cache.create(MODULES_NAMESPACE),
            queue: KeyedMutex::new(),
            modules: DashMap::new(),
            loaded: DashMap::new(),
            graph: RwLock::new(DependencyGraph::new()),
            events,
        }
    }

    /// The namespace holding `.meta.json` records.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Build-queue mutex, keyed by filename.
    pub fn queue(&self) -> &KeyedMutex {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }

    pub fn loaded(&self, filename: &Path) -> Option<Arc<Module>> {
        self.loaded.get(filename).map(|entry| Arc::clone(entry.value()))
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Created but not (yet) loaded.
    pub fn is_loading(&self, filename: &Path) -> bool {
        self.modules.contains_key(filename) && !self.loaded.contains_key(filename)
    }

    /// Modules importing `filename`, sorted.
    pub fn dependents(&self, filename: &Path) -> Vec<PathBuf> {
        let mut dependents: Vec<_> = self
            .graph
            .read()
            .dependents(filename)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    // =========================================================================
    // Require / create
    // =========================================================================

    /// Resolve `request` from `context` and return its loaded module.
    ///
    /// Builtins and unresolvable requests yield `None`.
    pub async fn require(
        &self,
        factory: &ModuleFactory,
        context: &Path,
        request: &str,
    ) -> Result<Option<Arc<Module>>> {
        let resolved = factory.resolve(context, request).await;
        self.require_resolved(factory, &resolved).await
    }

    pub async fn require_resolved(
        &self,
        factory: &ModuleFactory,
        resolved: &ResolvedModule,
    ) -> Result<Option<Arc<Module>>> {
        if resolved.builtin {
            return Ok(None);
        }
        let filename = &resolved.filename;

        if let Some(module) = self.loaded(filename)
            && let Some(module) = self
                .refresh(factory, module, &mut FxHashSet::default())
                .await?
        {
            return Ok(Some(module));
        }

        let key = queue_key(filename);
        let _token = self.queue.lock([&key]).await;
        if let Some(module) = self.loaded(filename) {
            return Ok(Some(module));
        }

        self.invalidate(factory, filename).await?;
        let module = self.create_in(factory, resolved, &[]).await?;
        Ok(Some(module))
    }

    /// Compile `resolved`, build its module and require its dependencies.
    ///
    /// Always builds a fresh module; [`require`](Self::require) is the
    /// entry point that reuses loaded ones.
    pub async fn create(
        &self,
        factory: &ModuleFactory,
        resolved: &ResolvedModule,
    ) -> Result<Arc<Module>> {
        let key = queue_key(&resolved.filename);
        let _token = self.queue.lock([&key]).await;
        self.create_in(factory, resolved, &[]).await
    }

    fn create_in<'a>(
        &'a self,
        factory: &'a ModuleFactory,
        resolved: &'a ResolvedModule,
        ancestors: &'a [PathBuf],
    ) -> BoxFuture<'a, Result<Arc<Module>>> {
        async move {
            let filename = resolved.filename.clone();
            let compiled = factory.compile(resolved).await?;

            let module = Arc::new(Module::new(
                filename.clone(),
                compiled.code,
                compiled.imports,
                compiled.mtime,
                resolved.kind,
                resolved.compile,
                self.cache.clone(),
            ));
            self.modules.insert(filename.clone(), Arc::clone(&module));
            // Edges of a previous build of this file; imports may have changed
            self.graph.write().remove(&filename);
            module.ready().await;

            if let Err(e) = self.link_imports(factory, &module, ancestors).await {
                self.modules
                    .remove_if(&filename, |_, m| Arc::ptr_eq(m, &module));
                self.graph.write().remove(&filename);
                return Err(e);
            }

            if module.is_evicted() {
                module.finish_evict();
                debug!("module"; "{} evicted while loading", filename.display());
                return Ok(module);
            }

            self.loaded.insert(filename, Arc::clone(&module));
            Ok(module)
        }
        .boxed()
    }

    /// Require every import of `module` and record the edges.
    async fn link_imports(
        &self,
        factory: &ModuleFactory,
        module: &Arc<Module>,
        ancestors: &[PathBuf],
    ) -> Result<()> {
        let filename = module.filename();
        let imports = factory
            .resolve_imports(filename, module.imports(), true)
            .await;

        let mut lineage = ancestors.to_vec();
        lineage.push(filename.to_path_buf());

        for dep in imports.iter().filter(|dep| !dep.builtin) {
            if module.is_evicted() {
                break;
            }
            module.add_pending(&dep.filename);
            let result = self.require_nested(factory, dep, &lineage).await;
            module.remove_pending(&dep.filename);
            result?;
            self.link(module, &dep.filename);
        }
        Ok(())
    }

    /// Require a dependency from inside another module's creation.
    async fn require_nested(
        &self,
        factory: &ModuleFactory,
        resolved: &ResolvedModule,
        lineage: &[PathBuf],
    ) -> Result<()> {
        let filename = &resolved.filename;
        if lineage.contains(filename) {
            debug!("module"; "cycle through {}", filename.display());
            return Ok(());
        }

        if let Some(module) = self.loaded(filename) {
            self.refresh(factory, module, &mut FxHashSet::default())
                .await?;
            if self.loaded.contains_key(filename) {
                return Ok(());
            }
        }

        let key = queue_key(filename);
        let _token = match self.queue.try_lock([&key]).await {
            Ok(token) => token,
            Err(e) => {
                debug!("module"; "not waiting for {}: {}", filename.display(), e);
                return Ok(());
            }
        };
        if self.loaded.contains_key(filename) {
            return Ok(());
        }

        self.invalidate(factory, filename).await?;
        self.create_in(factory, resolved, lineage).await?;
        Ok(())
    }

    fn link(&self, module: &Module, dependency: &Path) {
        if dependency == module.filename() {
            return;
        }
        module.add_dependency(dependency);
        self.graph.write().add_edge(module.filename(), dependency);
    }

    /// Evict `module` if it or anything it depends on changed on disk.
    ///
    /// Returns the module if it is still loaded afterwards.
    fn refresh<'a>(
        &'a self,
        factory: &'a ModuleFactory,
        module: Arc<Module>,
        visited: &'a mut FxHashSet<PathBuf>,
    ) -> BoxFuture<'a, Result<Option<Arc<Module>>>> {
        async move {
            let filename = module.filename().to_path_buf();
            if !visited.insert(filename.clone()) {
                return Ok(Some(module));
            }

            let current = factory.source_mtime(&filename).await.ok();
            if current != Some(module.mtime()) {
                debug!("module"; "{} changed on disk", filename.display());
                self.evict(factory, &filename, EvictOptions::recompile())
                    .await?;
                return Ok(None);
            }

            for dep in module.dependencies() {
                if let Some(dep_module) = self.loaded(&dep) {
                    self.refresh(factory, dep_module, visited).await?;
                }
            }
            Ok(self.loaded(&filename))
        }
        .boxed()
    }

    /// Purge the compile cache of `filename` if a dependency changed since
    /// its record was persisted, possibly in an earlier process.
    async fn invalidate(&self, factory: &ModuleFactory, filename: &Path) -> Result<()> {
        if self
            .has_stale_dependency(factory, filename, &mut FxHashSet::default())
            .await
        {
            debug!("module"; "dependencies of {} changed", filename.display());
            factory.purge(filename).await?;
        }
        Ok(())
    }

    fn has_stale_dependency<'a>(
        &'a self,
        factory: &'a ModuleFactory,
        filename: &'a Path,
        visited: &'a mut FxHashSet<PathBuf>,
    ) -> BoxFuture<'a, bool> {
        async move {
            if !visited.insert(filename.to_path_buf()) {
                return false;
            }
            let Some(record) = ModuleRecord::read(&self.cache, filename).await else {
                return false;
            };

            for dep in &record.dependencies {
                let current = factory.source_mtime(dep).await.ok();
                match ModuleRecord::read(&self.cache, dep).await {
                    Some(dep_record) if Some(dep_record.mtime) == current => {}
                    _ => return true,
                }
                if self.has_stale_dependency(factory, dep, visited).await {
                    return true;
                }
            }
            false
        }
        .boxed()
    }

    // =========================================================================
    // Evict / persist / meta
    // =========================================================================

    /// Evict `filename` and, first, everything that depends on it.
    ///
    /// A file that was never created and has no dependents is left alone,
    /// compile cache included.
    ///
    /// Every dependent is attempted even if one fails; the first failure is
    /// returned once the cascade is done.
    pub async fn evict(
        &self,
        factory: &ModuleFactory,
        filename: &Path,
        options: EvictOptions,
    ) -> Result<()> {
        let mut visited = FxHashSet::default();
        self.evict_from(factory, filename.to_path_buf(), options, &mut visited)
            .await
    }

    fn evict_from<'a>(
        &'a self,
        factory: &'a ModuleFactory,
        filename: PathBuf,
        options: EvictOptions,
        visited: &'a mut FxHashSet<PathBuf>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if !visited.insert(filename.clone()) {
                return Ok(());
            }
            let module = self
                .modules
                .get(&filename)
                .map(|entry| Arc::clone(entry.value()));
            let dependents = self.dependents(&filename);
            match &module {
                Some(module) if !module.begin_evict() => return Ok(()),
                None if dependents.is_empty() => return Ok(()),
                _ => {}
            }

            let mut first_error = None;
            for dependent in dependents {
                if let Err(e) = self
                    .evict_from(factory, dependent.clone(), options, visited)
                    .await
                {
                    debug!("evict"; "cascade to {} failed: {}", dependent.display(), e);
                    first_error.get_or_insert(e);
                }
            }

            if let Some(module) = &module {
                module.persist(self).await;
            }
            if options.recompile
                && let Err(e) = factory.purge(&filename).await
            {
                first_error.get_or_insert(e);
            }

            self.modules.remove(&filename);
            self.loaded.remove(&filename);
            self.graph.write().remove(&filename);
            if let Some(module) = &module {
                module.finish_evict();
            }

            debug!("evict"; "{}", filename.display());
            let _ = self.events.send(ModuleEvent::Evicted {
                filename,
                recompile: options.recompile,
            });

            first_error.map_or(Ok(()), Err)
        }
        .boxed()
    }

    /// Persist every loaded module whose record changed.
    pub async fn persist_all(&self) {
        let modules: Vec<_> = self
            .loaded
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for module in modules {
            module.persist(self).await;
        }
    }

    /// Dependencies, dependents and mtime of `filename`.
    ///
    /// Served from the live module when loaded, otherwise from its persisted
    /// record. `None` when neither exists.
    pub async fn meta(&self, filename: &Path) -> Option<ModuleMeta> {
        let dependents = self.dependents(filename);
        if let Some(module) = self.loaded(filename) {
            return Some(ModuleMeta {
                dependencies: module.dependencies(),
                dependents,
                mtime: module.mtime(),
            });
        }
        let record = ModuleRecord::read(&self.cache, filename).await?;
        Some(ModuleMeta {
            dependencies: record.dependencies,
            dependents,
            mtime: record.mtime,
        })
    }
}

fn queue_key(filename: &Path) -> String {
    filename.to_string_lossy().into_owned()
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("cache", &self.cache)
            .field("modules", &self.modules.len())
            .field("loaded", &self.loaded.len())
            .field("graph", &self.graph.read().len())
            .finish()
    }
}
