//! Persisted build cache.
//!
//! A [`Cache`] stores `(content, mtime)` pairs under a root directory through
//! a [`FileSystem`](crate::fs::FileSystem). Access is scoped by locks:
//!
//! ```text
//! cache.lock([a, b], |scope| async move {
//!     scope.get(a)        ok
//!     scope.get(c)        NoLock
//!     scope.lock([a, c], |inner| ...)   a reused, only c acquired
//! })
//! ```
//!
//! Locks are keyed by physical storage path, so every namespace created with
//! [`Cache::create`] shares one [`KeyedMutex`](crate::lock::KeyedMutex).

mod error;
mod layout;
mod scope;
mod store;

pub use error::CacheError;
pub use layout::{KeyHash, STATS_SUFFIX, StorageLayout, stats_path};
pub use scope::ScopedCache;
pub use store::Cache;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DiskFs, FileSystem, MemoryFs};
    use std::path::Path;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn memory_cache(root: &str) -> (Arc<MemoryFs>, Cache) {
        let fs = Arc::new(MemoryFs::new());
        let cache = Cache::new(root, StorageLayout::Direct, fs.clone());
        (fs, cache)
    }

    #[tokio::test]
    async fn test_set_get_modified() {
        let (_fs, cache) = memory_cache("/cache");

        cache.set("test", "test1", 42).await.unwrap();

        assert_eq!(cache.get("test").await.unwrap(), b"test1");
        assert_eq!(cache.modified("test").await.unwrap(), 42);
        assert!(cache.has("test").await);
    }

    #[tokio::test]
    async fn test_sidecar_written_next_to_payload() {
        let (fs, cache) = memory_cache("/cache");

        cache.set("/site/a.js", "x", 7).await.unwrap();

        let payload = cache.storage_path("/site/a.js");
        assert_eq!(payload, Path::new("/cache/site/a.js"));
        let stats = fs.read_to_string(&stats_path(&payload)).await.unwrap();
        assert_eq!(stats, r#"{"mtime":7}"#);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (_fs, cache) = memory_cache("/cache");

        assert!(!cache.has("nope").await);
        assert!(cache.get("nope").await.unwrap_err().is_not_found());
        assert!(cache.modified("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_deletes_payload_and_sidecar() {
        let (fs, cache) = memory_cache("/cache");
        cache.set("k", "v", 1).await.unwrap();

        cache.remove("k").await.unwrap();
        cache.remove("k").await.unwrap();

        assert!(!cache.has("k").await);
        assert!(!fs.exists(&stats_path(&cache.storage_path("k"))).await);
    }

    #[tokio::test]
    async fn test_scope_rejects_unheld_key() {
        let (_fs, cache) = memory_cache("/cache");

        let err = cache
            .lock(["a"], |scope| async move { scope.get("b").await })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::NoLock { ref key } if key == "b"));
    }

    #[tokio::test]
    async fn test_escaped_scope_holds_nothing() {
        let (_fs, cache) = memory_cache("/cache");

        let escaped = cache
            .lock(["a"], |scope| async move { Ok::<_, CacheError>(scope) })
            .await
            .unwrap();

        assert!(!escaped.holds("a"));
        assert!(matches!(
            escaped.set("a", "x", 1).await,
            Err(CacheError::NoLock { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_lock_reuses_held_keys() {
        let (_fs, cache) = memory_cache("/cache");
        let key_a = cache.lock_key("a");
        let key_b = cache.lock_key("b");

        let probe = cache.clone();
        cache
            .lock(["a"], |outer| async move {
                outer.set("a", "1", 1).await?;

                // Re-locking "a" must not wait on ourselves
                outer
                    .lock(["a", "b"], |inner| async move {
                        inner.set("b", "2", 2).await?;
                        assert_eq!(inner.get("a").await?, b"1");
                        Ok::<_, CacheError>(())
                    })
                    .await?;

                // "b" was released with the inner scope, "a" is still ours
                assert!(probe.mutex().locked([&key_a]));
                assert!(!probe.mutex().locked([&key_b]));
                assert!(outer.has("b").await.is_err());
                Ok::<_, CacheError>(())
            })
            .await
            .unwrap();

        assert!(cache.mutex().held_keys().is_empty());
        assert_eq!(cache.get("b").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_lock_released_on_error() {
        let (_fs, cache) = memory_cache("/cache");

        let result = cache
            .lock(["a"], |scope| async move { scope.get("a").await })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert!(cache.mutex().held_keys().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_try_lock_fails_while_held_elsewhere() {
        let (_fs, cache) = memory_cache("/tmp");
        cache.set("test", "test1", 1).await.unwrap();

        let (held_tx, held_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .lock(["test"], move |_scope| async move {
                        let _ = held_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, CacheError>(())
                    })
                    .await
            })
        };
        held_rx.await.unwrap();

        let err = cache
            .try_lock(["test"], |scope| async move { scope.get("test").await })
            .await
            .unwrap_err();
        assert!(err.is_contention());
        assert!(err.to_string().contains("lock fail"));

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        // Free again: fail mode now succeeds
        let value = cache
            .try_lock(["test"], |scope| async move { scope.get("test").await })
            .await
            .unwrap();
        assert_eq!(value, b"test1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_try_lock_detects_crossed_chains() {
        let (_fs, cache) = memory_cache("/cache");

        // Chain 1 holds "b" and waits for chain 2 to hold "a"
        let (b_held_tx, b_held_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let other = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .lock(["b"], move |_scope| async move {
                        let _ = b_held_tx.send(());
                        let _ = done_rx.await;
                        Ok::<_, CacheError>(())
                    })
                    .await
            })
        };
        b_held_rx.await.unwrap();

        // Chain 2 holds "a" and asks for "b": waiting would be the classic
        // crossed acquisition, fail mode reports it instead
        let err = cache
            .lock(["a"], |scope| async move {
                scope
                    .try_lock(["b"], |inner| async move { inner.has("b").await })
                    .await
            })
            .await
            .unwrap_err();
        assert!(err.is_contention());

        done_tx.send(()).unwrap();
        other.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_namespaces_share_lock_state() {
        let (_fs, root) = memory_cache("/cache");
        let modules = root.create("modules");

        assert_eq!(modules.root(), Path::new("/cache/modules"));

        modules
            .lock(["x"], |_scope| async {
                // Same physical key, seen from the parent namespace
                assert!(root.mutex().locked([modules.lock_key("x")]));
                Ok::<_, CacheError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (_fs, cache) = memory_cache("/cache");

        cache
            .lock(["deps.json"], |scope| async move {
                scope
                    .set_json("deps.json", &vec!["/a.js", "/b.js"], 3)
                    .await?;
                let deps: Vec<String> = scope.get_json("deps.json").await?;
                assert_eq!(deps, ["/a.js", "/b.js"]);
                assert_eq!(scope.modified("deps.json").await?, 3);
                Ok::<_, CacheError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hashed_layout_round_trip() {
        let fs = Arc::new(MemoryFs::new());
        let cache = Cache::new("/cache", StorageLayout::Hashed, fs);

        cache.set("/site/src/a.js", "code", 5).await.unwrap();

        assert_eq!(cache.get("/site/src/a.js").await.unwrap(), b"code");
        assert_ne!(
            cache.storage_path("/site/src/a.js"),
            Path::new("/cache/site/src/a.js")
        );
    }

    #[tokio::test]
    async fn test_clean_removes_root() {
        let (fs, cache) = memory_cache("/cache");
        cache.set("a", "1", 1).await.unwrap();
        cache.create("modules").set("b", "2", 2).await.unwrap();

        cache.clean().await.unwrap();

        assert!(!fs.exists(Path::new("/cache")).await);
        assert!(!cache.has("a").await);
    }

    #[tokio::test]
    async fn test_disk_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = Cache::new(dir.path(), StorageLayout::Direct, Arc::new(DiskFs));

        cache.set("nested/entry", "payload", 99).await.unwrap();

        assert_eq!(cache.get("nested/entry").await.unwrap(), b"payload");
        assert_eq!(cache.modified("nested/entry").await.unwrap(), 99);
        assert!(dir.path().join("nested/entry.stats").exists());
    }
}
