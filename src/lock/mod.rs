//! Exclusive lock primitives for shared cache state.
//!
//! Two layers:
//! - [`Lock`]: a single FIFO mutex whose holders form a chain of release signals
//! - [`KeyedMutex`]: one independent chain per string key plus a global lock
//!
//! ```text
//! holder #1 ──release──▶ signal #1 ──▶ holder #2 ──release──▶ signal #2 ──▶ ...
//! ```
//!
//! Each holder's signal resolves only after the previous signal resolved AND
//! the holder released its token. A waiter that is dropped before it acquires
//! still resolves its signal strictly after its predecessor, so the chain
//! never lets two holders in at once.
//!
//! `try_*` variants never queue: they fail with [`LockError::Contention`] when
//! the lock is already held. That is the only sanctioned way to detect
//! reentrant lock usage; there is no general cycle detection.

mod keyed;
mod mutex;

pub use keyed::{GlobalToken, KeyedMutex, KeyedToken};
pub use mutex::{Lock, LockToken};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;

/// Key reported when the global registration lock is contended.
pub const GLOBAL_KEY: &str = "<global>";

/// Lock acquisition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The requested lock is already held and the caller asked not to wait.
    #[error("lock fail: detected reentrant/cyclic lock usage on key `{key}`")]
    Contention { key: String },
}

impl LockError {
    pub(crate) fn contention(key: impl Into<String>) -> Self {
        Self::Contention { key: key.into() }
    }
}

/// Resolves once its holder is done with the lock.
pub(crate) type Signal = Shared<BoxFuture<'static, ()>>;

/// One link of a lock chain.
pub(crate) struct Link {
    pub(crate) id: u64,
    pub(crate) signal: Signal,
}

/// Build the signal for a new holder.
///
/// Settles after `prev` settled and `release` fired (or its sender dropped).
pub(crate) fn chain(prev: Option<Signal>, release: oneshot::Receiver<()>) -> Signal {
    async move {
        if let Some(prev) = prev {
            prev.await;
        }
        let _ = release.await;
    }
    .boxed()
    .shared()
}

/// Whether a signal has already settled (polls it once, never blocks).
#[inline]
pub(crate) fn is_settled(signal: &Signal) -> bool {
    signal.clone().now_or_never().is_some()
}

/// Normalize a key list: owned, sorted, deduplicated.
pub(crate) fn normalize_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_owned()).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_message() {
        let err = LockError::contention("/tmp/test");
        let msg = err.to_string();
        assert!(msg.contains("lock fail"));
        assert!(msg.contains("/tmp/test"));
    }

    #[test]
    fn test_normalize_keys_dedups() {
        assert_eq!(normalize_keys(["b", "a", "b"]), vec!["a", "b"]);
        assert!(normalize_keys(Vec::<String>::new()).is_empty());
    }

    #[tokio::test]
    async fn test_chain_waits_for_previous() {
        let (tx1, rx1) = oneshot::channel();
        let first = chain(None, rx1);
        let (tx2, rx2) = oneshot::channel();
        let second = chain(Some(first.clone()), rx2);

        // Second released before first: still pending
        tx2.send(()).unwrap();
        assert!(!is_settled(&second));

        tx1.send(()).unwrap();
        assert!(is_settled(&first));
        assert!(is_settled(&second));
    }

    #[tokio::test]
    async fn test_dropped_sender_settles() {
        let (tx, rx) = oneshot::channel::<()>();
        let signal = chain(None, rx);
        assert!(!is_settled(&signal));
        drop(tx);
        assert!(is_settled(&signal));
    }
}
