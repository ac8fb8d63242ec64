//! One node of the module graph.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::ModuleContext;
use crate::cache::{Cache, CacheError};
use crate::debug;
use crate::fs::Mtime;
use crate::resolver::ModuleKind;

/// Suffix of the persisted record key: `<filename>.meta.json`.
pub const META_SUFFIX: &str = ".meta.json";

/// Cache key of the persisted record for `filename`.
pub fn meta_key(filename: &Path) -> String {
    format!("{}{META_SUFFIX}", filename.display())
}

/// What a module looked like when it was last persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Sorted, so identical graphs serialize identically.
    pub dependencies: Vec<PathBuf>,
    pub mtime: Mtime,
}

impl ModuleRecord {
    /// Read the record for `filename`. Any failure reads as "no record".
    pub async fn read(cache: &Cache, filename: &Path) -> Option<Self> {
        let key = meta_key(filename);
        let result = cache
            .read_lock([&key], |scope| {
                let key = &key;
                async move { scope.get_json::<ModuleRecord>(key).await }
            })
            .await;
        match result {
            Ok(record) => Some(record),
            Err(CacheError::NotFound { .. }) => None,
            Err(e) => {
                debug!("module"; "ignoring record of {}: {}", filename.display(), e);
                None
            }
        }
    }
}

/// Lifecycle of a [`Module`].
///
/// ```text
/// Created → Initializing → Ready → Evicting → Evicted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Initializing,
    Ready,
    Evicting,
    Evicted,
}

#[derive(Debug)]
struct NodeState {
    phase: Phase,
    /// Grown by `add_dependency` during a load, never shrunk.
    dependencies: BTreeSet<PathBuf>,
    /// Dependencies currently being required on behalf of this module.
    pending: FxHashSet<PathBuf>,
    /// Last record written or read back from the cache.
    stored: Option<ModuleRecord>,
    persisted: bool,
}

/// A compiled file and its outgoing edges.
///
/// Reverse edges (dependents) live in the context's
/// [`DependencyGraph`](super::DependencyGraph), not here.
pub struct Module {
    filename: PathBuf,
    code: Arc<str>,
    imports: Vec<String>,
    mtime: Mtime,
    kind: ModuleKind,
    compiled: bool,
    cache: Cache,
    /// Record from the previous run; initialized once, gates `ready()`.
    previous: OnceCell<Option<ModuleRecord>>,
    state: Mutex<NodeState>,
}

impl Module {
    /// `cache` is the namespace holding `.meta.json` records.
    pub fn new(
        filename: PathBuf,
        code: impl Into<Arc<str>>,
        imports: Vec<String>,
        mtime: Mtime,
        kind: ModuleKind,
        compiled: bool,
        cache: Cache,
    ) -> Self {
        Self {
            filename,
            code: code.into(),
            imports,
            mtime,
            kind,
            compiled,
            cache,
            previous: OnceCell::new(),
            state: Mutex::new(NodeState {
                phase: Phase::Created,
                dependencies: BTreeSet::new(),
                pending: FxHashSet::default(),
                stored: None,
                persisted: false,
            }),
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn mtime(&self) -> Mtime {
        self.mtime
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Whether the code went through the compiler (vs. passed through).
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Raw import specifiers reported by the compiler.
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Wait until the previous run's record has been looked up.
    ///
    /// The first call performs the lookup; later calls return at once.
    pub async fn ready(&self) {
        self.previous
            .get_or_init(|| async {
                self.set_phase_if(Phase::Created, Phase::Initializing);
                let record = ModuleRecord::read(&self.cache, &self.filename).await;
                self.state.lock().stored = record.clone();
                record
            })
            .await;
        self.set_phase_if(Phase::Initializing, Phase::Ready);
    }

    /// Record from the previous run, once [`ready`](Self::ready) resolved.
    pub fn previous(&self) -> Option<&ModuleRecord> {
        self.previous.get().and_then(Option::as_ref)
    }

    /// The compiled code. Every call returns the same shared buffer.
    pub fn load(&self) -> Arc<str> {
        Arc::clone(&self.code)
    }

    /// Record an edge to `dependency`. Returns whether it is new.
    pub fn add_dependency(&self, dependency: &Path) -> bool {
        if dependency == self.filename {
            return false;
        }
        let mut state = self.state.lock();
        let added = state.dependencies.insert(dependency.to_path_buf());
        if added {
            state.persisted = false;
        }
        added
    }

    /// Current dependencies, sorted.
    pub fn dependencies(&self) -> Vec<PathBuf> {
        self.state.lock().dependencies.iter().cloned().collect()
    }

    /// Whether the dependency set or mtime differs from the last stored record.
    pub fn is_stale(&self) -> bool {
        !Self::matches_stored(&self.state.lock(), self.mtime)
    }

    /// Both dependency lists are sorted and deduplicated, so sequence
    /// equality is an empty symmetric difference.
    fn matches_stored(state: &NodeState, mtime: Mtime) -> bool {
        state.stored.as_ref().is_some_and(|stored| {
            stored.mtime == mtime && stored.dependencies.iter().eq(state.dependencies.iter())
        })
    }

    /// Write the record if it changed, then persist loaded direct dependencies.
    ///
    /// Failures are logged and swallowed: a missing record only costs a
    /// rebuild later.
    pub fn persist<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, ()> {
        async move {
            let record = {
                let mut state = self.state.lock();
                if state.persisted {
                    return;
                }
                // Claim before writing so cycles and concurrent callers stop here
                state.persisted = true;
                if Self::matches_stored(&state, self.mtime) {
                    None
                } else {
                    Some(ModuleRecord {
                        dependencies: state.dependencies.iter().cloned().collect(),
                        mtime: self.mtime,
                    })
                }
            };

            if let Some(record) = record {
                if let Err(e) = self.write_record(&record).await {
                    debug!("module"; "persist {} failed: {}", self.filename.display(), e);
                    self.state.lock().persisted = false;
                    return;
                }
                debug!("module"; "persisted {}", self.filename.display());
                self.state.lock().stored = Some(record);
            }

            for dep in self.dependencies() {
                if let Some(module) = ctx.loaded(&dep) {
                    module.persist(ctx).await;
                }
            }
        }
        .boxed()
    }

    async fn write_record(&self, record: &ModuleRecord) -> Result<(), CacheError> {
        let key = meta_key(&self.filename);
        self.cache
            .lock([&key], |scope| {
                let key = &key;
                async move { scope.set_json(key, record, record.mtime).await }
            })
            .await
    }

    pub fn is_persisted(&self) -> bool {
        self.state.lock().persisted
    }

    // =========================================================================
    // Lifecycle (driven by ModuleContext)
    // =========================================================================

    pub(super) fn add_pending(&self, dependency: &Path) {
        self.state.lock().pending.insert(dependency.to_path_buf());
    }

    pub(super) fn remove_pending(&self, dependency: &Path) {
        self.state.lock().pending.remove(dependency);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Enter `Evicting`. False if eviction already started.
    pub(super) fn begin_evict(&self) -> bool {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Evicting | Phase::Evicted => false,
            _ => {
                state.phase = Phase::Evicting;
                true
            }
        }
    }

    /// Enter `Evicted`, abandoning any in-flight dependency loads.
    pub(super) fn finish_evict(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Evicted;
        state.pending.clear();
    }

    pub fn is_evicted(&self) -> bool {
        matches!(self.phase(), Phase::Evicting | Phase::Evicted)
    }

    fn set_phase_if(&self, from: Phase, to: Phase) {
        let mut state = self.state.lock();
        if state.phase == from {
            state.phase = to;
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Module")
            .field("filename", &self.filename)
            .field("mtime", &self.mtime)
            .field("kind", &self.kind)
            .field("phase", &state.phase)
            .field("dependencies", &state.dependencies)
            .finish()
    }
}
