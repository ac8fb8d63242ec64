//! Persisted key/value store with per-key locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::{FileSystem, Mtime};
use crate::lock::KeyedMutex;

use super::scope::{ScopeState, ScopedCache};
use super::{CacheError, StorageLayout};

/// A persisted key/value store of `(content, mtime)` pairs.
///
/// All access goes through [`Cache::lock`]: the callback receives a
/// [`ScopedCache`] that may only touch the keys it holds. The single-key
/// helpers (`get`, `set`, ...) take and release a lock around one operation.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    root: PathBuf,
    layout: StorageLayout,
    fs: Arc<dyn FileSystem>,
    /// Shared by every namespace created from the same root cache
    mutex: KeyedMutex,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>, layout: StorageLayout, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                root: root.into(),
                layout,
                fs,
                mutex: KeyedMutex::new(),
            }),
        }
    }

    /// A sub-cache rooted at `<root>/<name>`.
    ///
    /// Shares the filesystem and lock state with `self`.
    pub fn create(&self, name: &str) -> Cache {
        Self {
            inner: Arc::new(CacheInner {
                root: self.inner.root.join(name),
                layout: self.inner.layout,
                fs: Arc::clone(&self.inner.fs),
                mutex: self.inner.mutex.clone(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn layout(&self) -> StorageLayout {
        self.inner.layout
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.inner.fs
    }

    /// The mutex guarding this cache's physical keys.
    pub fn mutex(&self) -> &KeyedMutex {
        &self.inner.mutex
    }

    /// Physical payload path for a logical key.
    pub fn storage_path(&self, key: &str) -> PathBuf {
        self.inner.layout.storage_path(&self.inner.root, key)
    }

    /// Lock key for a logical key: its physical path.
    pub(crate) fn lock_key(&self, key: &str) -> String {
        self.storage_path(key).to_string_lossy().into_owned()
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Hold every key in `keys` while `f` runs.
    ///
    /// The keys are released when `f`'s future settles, whether it succeeded
    /// or failed.
    pub async fn lock<I, S, F, Fut, T, E>(&self, keys: I, f: F) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        self.scoped(None, keys, false, f).await
    }

    /// Like [`lock`](Self::lock), but fail with lock contention instead of
    /// waiting when a key is held by another chain.
    pub async fn try_lock<I, S, F, Fut, T, E>(&self, keys: I, f: F) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        self.scoped(None, keys, true, f).await
    }

    /// [`lock`](Self::lock) for call sites that only read.
    ///
    /// Same exclusive lock underneath; the name documents intent.
    pub async fn read_lock<I, S, F, Fut, T, E>(&self, keys: I, f: F) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        self.scoped(None, keys, false, f).await
    }

    /// Acquire the keys not already held by `parent`, then run `f` in a child scope.
    pub(super) async fn scoped<I, S, F, Fut, T, E>(
        &self,
        parent: Option<&Arc<ScopeState>>,
        keys: I,
        fail: bool,
        f: F,
    ) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        let mut fresh: Vec<String> = keys
            .into_iter()
            .map(|key| self.lock_key(key.as_ref()))
            .filter(|key| !parent.is_some_and(|scope| scope.holds(key)))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();

        let token = if fresh.is_empty() {
            None
        } else if fail {
            let token = self
                .inner
                .mutex
                .try_lock(&fresh)
                .await
                .map_err(|e| E::from(CacheError::from(e)))?;
            Some(token)
        } else {
            Some(self.inner.mutex.lock(&fresh).await)
        };

        let state = Arc::new(ScopeState::new(parent.cloned(), fresh));
        let result = f(ScopedCache::new(self.clone(), Arc::clone(&state))).await;

        state.close();
        drop(token);
        result
    }

    // =========================================================================
    // Single-key helpers
    // =========================================================================

    pub async fn set(
        &self,
        key: &str,
        content: impl AsRef<[u8]>,
        mtime: Mtime,
    ) -> Result<(), CacheError> {
        let content = content.as_ref();
        self.lock([key], |cache| async move { cache.set(key, content, mtime).await })
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.read_lock([key], |cache| async move { cache.get(key).await })
            .await
    }

    /// Whether `key` has been set. Never fails.
    pub async fn has(&self, key: &str) -> bool {
        self.read_lock([key], |cache| async move { cache.has(key).await })
            .await
            .unwrap_or(false)
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.lock([key], |cache| async move { cache.remove(key).await })
            .await
    }

    pub async fn modified(&self, key: &str) -> Result<Mtime, CacheError> {
        self.read_lock([key], |cache| async move { cache.modified(key).await })
            .await
    }

    /// Delete the whole cache root once every outstanding lock drained.
    pub async fn clean(&self) -> Result<(), CacheError> {
        let _global = self.inner.mutex.lock_global().await;
        self.inner
            .fs
            .rm(&self.inner.root, true, true)
            .await
            .map_err(|e| CacheError::io(&self.inner.root, e))?;
        crate::debug!("cache"; "cleaned {}", self.inner.root.display());
        Ok(())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("root", &self.inner.root)
            .field("layout", &self.inner.layout)
            .finish()
    }
}
