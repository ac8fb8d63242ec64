//! One lock chain per string key, plus a global lock.
//!
//! The global lock serializes *registration*: checking whether a key is held
//! and queueing behind it happen atomically for every caller. Critical
//! sections on different keys run concurrently once registered.
//!
//! [`KeyedMutex::lock_global`] takes the global lock and then waits for every
//! outstanding key to drain, which gives whole-cache operations exclusive
//! access.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use super::{GLOBAL_KEY, Link, Lock, LockError, LockToken, Signal, chain, is_settled, normalize_keys};

type LinkMap = FxHashMap<String, Link>;

/// Manages one independent FIFO lock per key.
///
/// Cloning yields another handle to the same set of locks.
#[derive(Clone, Default)]
pub struct KeyedMutex {
    inner: Arc<KeyedInner>,
}

struct KeyedInner {
    global: Lock,
    /// Set while a global holder waits for (or holds) exclusive access
    draining: AtomicBool,
    locks: Mutex<LinkMap>,
    next_id: AtomicU64,
}

impl Default for KeyedInner {
    fn default() -> Self {
        Self {
            global: Lock::named(GLOBAL_KEY),
            draining: AtomicBool::new(false),
            locks: Mutex::new(LinkMap::default()),
            next_id: AtomicU64::new(0),
        }
    }
}

// =============================================================================
// Acquisition
// =============================================================================

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until every key in `keys` is ours.
    ///
    /// Duplicate keys are collapsed. An empty key list returns an inert token
    /// immediately.
    pub async fn lock<I, S>(&self, keys: I) -> KeyedToken
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = normalize_keys(keys);
        if keys.is_empty() {
            return self.empty_token();
        }

        let global = self.inner.global.lock().await;
        let (token, prevs) = self.register(&mut self.inner.locks.lock(), keys);
        drop(global);

        join_all(prevs).await;
        token
    }

    /// Take every key in `keys`, or fail without queueing if any is held.
    ///
    /// Also fails while a global holder is draining the mutex.
    pub async fn try_lock<I, S>(&self, keys: I) -> Result<KeyedToken, LockError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = normalize_keys(keys);
        if keys.is_empty() {
            return Ok(self.empty_token());
        }
        if self.inner.draining.load(Ordering::SeqCst) {
            return Err(LockError::contention(GLOBAL_KEY));
        }

        let global = self.inner.global.lock().await;
        let (token, prevs) = {
            let mut locks = self.inner.locks.lock();
            if let Some(key) = keys.iter().find(|key| is_live(&mut locks, key)) {
                crate::debug!("lock"; "contention on {}", key);
                return Err(LockError::contention(key.as_str()));
            }
            self.register(&mut locks, keys)
        };
        drop(global);

        // Every key was free, so nothing is left to wait for
        debug_assert!(prevs.is_empty());
        join_all(prevs).await;
        Ok(token)
    }

    /// Take the global lock and wait for all outstanding keys to drain.
    ///
    /// Must not be called while holding a key of this mutex: the drain would
    /// wait on the caller itself.
    pub async fn lock_global(&self) -> GlobalToken {
        let global = self.inner.global.lock().await;
        self.drain(global).await
    }

    /// Like [`lock_global`](Self::lock_global), but fail if the global lock is held.
    pub async fn try_lock_global(&self) -> Result<GlobalToken, LockError> {
        let global = self.inner.global.try_lock()?;
        Ok(self.drain(global).await)
    }

    fn register(&self, locks: &mut LinkMap, keys: Vec<String>) -> (KeyedToken, Vec<Signal>) {
        let mut links = Vec::with_capacity(keys.len());
        let mut prevs = Vec::new();

        for key in keys {
            let prev = locks
                .remove(&key)
                .map(|link| link.signal)
                .filter(|signal| !is_settled(signal));
            let (tx, rx) = oneshot::channel();
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

            locks.insert(
                key.clone(),
                Link {
                    id,
                    signal: chain(prev.clone(), rx),
                },
            );
            prevs.extend(prev);
            links.push(HeldKey { key, id, release: Some(tx) });
        }

        let token = KeyedToken {
            inner: Arc::clone(&self.inner),
            links,
        };
        (token, prevs)
    }

    async fn drain(&self, global: LockToken) -> GlobalToken {
        self.inner.draining.store(true, Ordering::SeqCst);

        let pending: Vec<Signal> = self
            .inner
            .locks
            .lock()
            .values()
            .map(|link| link.signal.clone())
            .collect();
        crate::debug_do! {
            let held = self.held_keys();
            crate::debug!("lock"; "draining {} key(s) for global lock: {:?}", pending.len(), held);
        }
        join_all(pending).await;

        self.inner
            .locks
            .lock()
            .retain(|_, link| !is_settled(&link.signal));

        GlobalToken {
            _global: global,
            inner: Arc::clone(&self.inner),
        }
    }

    fn empty_token(&self) -> KeyedToken {
        KeyedToken {
            inner: Arc::clone(&self.inner),
            links: Vec::new(),
        }
    }
}

// =============================================================================
// Introspection
// =============================================================================

// These are snapshots: a key reported free may be taken before the caller acts.

impl KeyedMutex {
    /// Whether any of `keys` is held.
    pub fn locked<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut locks = self.inner.locks.lock();
        keys.into_iter().any(|key| is_live(&mut locks, key.as_ref()))
    }

    /// Whether all of `keys` are held.
    pub fn locked_all<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut locks = self.inner.locks.lock();
        keys.into_iter().all(|key| is_live(&mut locks, key.as_ref()))
    }

    /// Whether none of `keys` is held.
    pub fn locked_not<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        !self.locked(keys)
    }

    /// Whether exactly `keys` are held and nothing else.
    pub fn locked_only<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        normalize_keys(keys) == self.held_keys()
    }

    /// All currently held keys, sorted.
    pub fn held_keys(&self) -> Vec<String> {
        let mut locks = self.inner.locks.lock();
        locks.retain(|_, link| !is_settled(&link.signal));
        let mut keys: Vec<String> = locks.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Whether a global holder is draining or holding the mutex.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for KeyedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("held", &self.held_keys())
            .field("draining", &self.is_draining())
            .finish()
    }
}

/// Whether `key` has an unsettled link; settled links are purged on the way.
fn is_live(locks: &mut LinkMap, key: &str) -> bool {
    match locks.get(key) {
        Some(link) if is_settled(&link.signal) => {
            locks.remove(key);
            false
        }
        Some(_) => true,
        None => false,
    }
}

// =============================================================================
// Tokens
// =============================================================================

struct HeldKey {
    key: String,
    id: u64,
    release: Option<oneshot::Sender<()>>,
}

/// Release right for the keys registered by one `lock`/`try_lock` call.
pub struct KeyedToken {
    inner: Arc<KeyedInner>,
    links: Vec<HeldKey>,
}

impl KeyedToken {
    /// Release every key. Calling this twice is a no-op.
    pub fn unlock(&mut self) {
        let mut released = Vec::new();
        for held in &mut self.links {
            if let Some(tx) = held.release.take() {
                let _ = tx.send(());
                released.push(held);
            }
        }
        if released.is_empty() {
            return;
        }

        let mut locks = self.inner.locks.lock();
        for held in released {
            if locks
                .get(&held.key)
                .is_some_and(|link| link.id == held.id && is_settled(&link.signal))
            {
                locks.remove(&held.key);
            }
        }
    }

    /// Keys this token registered.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|held| held.key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Drop for KeyedToken {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl std::fmt::Debug for KeyedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

impl std::fmt::Debug for GlobalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalToken").field("global", &self._global).finish()
    }
}

/// Exclusive access to a whole [`KeyedMutex`].
pub struct GlobalToken {
    _global: LockToken,
    inner: Arc<KeyedInner>,
}

impl Drop for GlobalToken {
    fn drop(&mut self) {
        self.inner.draining.store(false, Ordering::SeqCst);
    }
}
