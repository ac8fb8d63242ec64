//! Lock-scoped cache access.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::fs::Mtime;

use super::{Cache, CacheError, stats_path};

/// Keys held by one lock scope, chained to the scope that opened it.
pub(crate) struct ScopeState {
    held: FxHashSet<String>,
    parent: Option<Arc<ScopeState>>,
    alive: AtomicBool,
}

impl ScopeState {
    pub(super) fn new(parent: Option<Arc<ScopeState>>, keys: Vec<String>) -> Self {
        Self {
            held: keys.into_iter().collect(),
            parent,
            alive: AtomicBool::new(true),
        }
    }

    /// Whether this scope or any ancestor holds `key`.
    pub(super) fn holds(&self, key: &str) -> bool {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.held.contains(key) {
                return true;
            }
            scope = current.parent.as_deref();
        }
        false
    }

    pub(super) fn close(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Timestamp sidecar contents.
#[derive(Debug, Serialize, Deserialize)]
struct Stats {
    mtime: Mtime,
}

/// Cache handle valid only inside a [`Cache::lock`] callback.
///
/// Every operation checks that its key is held by this scope or one of the
/// scopes enclosing it, and fails with [`CacheError::NoLock`] otherwise. A
/// handle smuggled out of its callback holds nothing.
#[derive(Clone)]
pub struct ScopedCache {
    cache: Cache,
    state: Arc<ScopeState>,
}

impl ScopedCache {
    pub(super) fn new(cache: Cache, state: Arc<ScopeState>) -> Self {
        Self { cache, state }
    }

    /// The cache this scope belongs to.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Whether this scope may touch `key`.
    pub fn holds(&self, key: &str) -> bool {
        self.state.is_alive() && self.state.holds(&self.cache.lock_key(key))
    }

    fn check(&self, key: &str) -> Result<(), CacheError> {
        if self.holds(key) {
            Ok(())
        } else {
            Err(CacheError::NoLock {
                key: key.to_string(),
            })
        }
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Store `content` under `key`, stamped with `mtime`.
    pub async fn set(
        &self,
        key: &str,
        content: impl AsRef<[u8]>,
        mtime: Mtime,
    ) -> Result<(), CacheError> {
        self.check(key)?;
        let fs = self.cache.fs();
        let payload = self.cache.storage_path(key);

        if let Some(parent) = payload.parent() {
            fs.mkdir(parent, true)
                .await
                .map_err(|e| CacheError::io(parent, e))?;
        }
        fs.write_file(&payload, content.as_ref())
            .await
            .map_err(|e| CacheError::io(&payload, e))?;

        let stats = serde_json::to_vec(&Stats { mtime }).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })?;
        let sidecar = stats_path(&payload);
        fs.write_file(&sidecar, &stats)
            .await
            .map_err(|e| CacheError::io(&sidecar, e))
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.check(key)?;
        let payload = self.cache.storage_path(key);
        self.read(key, &payload).await
    }

    pub async fn get_string(&self, key: &str) -> Result<String, CacheError> {
        let bytes = self.get(key).await?;
        String::from_utf8(bytes).map_err(|e| {
            CacheError::io(
                self.cache.storage_path(key),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Whether `key` has a payload. Only fails when the key is not held.
    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        self.check(key)?;
        Ok(self.cache.fs().is_file(&self.cache.storage_path(key)).await)
    }

    /// Delete `key` and its sidecar. Missing entries are not an error.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.check(key)?;
        let fs = self.cache.fs();
        let payload = self.cache.storage_path(key);
        let sidecar = stats_path(&payload);

        fs.rm(&payload, true, true)
            .await
            .map_err(|e| CacheError::io(&payload, e))?;
        fs.rm(&sidecar, true, true)
            .await
            .map_err(|e| CacheError::io(&sidecar, e))
    }

    /// The mtime recorded by the last `set` of `key`.
    pub async fn modified(&self, key: &str) -> Result<Mtime, CacheError> {
        self.check(key)?;
        let sidecar = stats_path(&self.cache.storage_path(key));
        let bytes = self.read(key, &sidecar).await?;
        let stats: Stats = serde_json::from_slice(&bytes).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })?;
        Ok(stats.mtime)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        mtime: Mtime,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })?;
        self.set(key, bytes, mtime).await
    }

    async fn read(&self, key: &str, path: &Path) -> Result<Vec<u8>, CacheError> {
        match self.cache.fs().read_file(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    // =========================================================================
    // Nested locking
    // =========================================================================

    /// Lock more keys from inside this scope.
    ///
    /// Keys this scope already holds are reused rather than re-acquired, so
    /// nesting on the same key never waits on itself.
    pub async fn lock<I, S, F, Fut, T, E>(&self, keys: I, f: F) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        self.cache.scoped(Some(&self.state), keys, false, f).await
    }

    /// Nested [`lock`](Self::lock) that fails on contention instead of waiting.
    pub async fn try_lock<I, S, F, Fut, T, E>(&self, keys: I, f: F) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        self.cache.scoped(Some(&self.state), keys, true, f).await
    }

    pub async fn read_lock<I, S, F, Fut, T, E>(&self, keys: I, f: F) -> Result<T, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(ScopedCache) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        self.cache.scoped(Some(&self.state), keys, false, f).await
    }
}

impl std::fmt::Debug for ScopedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut held: Vec<_> = self.state.held.iter().collect();
        held.sort();
        f.debug_struct("ScopedCache")
            .field("root", &self.cache.root())
            .field("held", &held)
            .finish()
    }
}
