//! Single exclusive lock with FIFO hand-off.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{Link, LockError, Signal, chain, is_settled};

/// A FIFO mutex.
///
/// `lock()` returns a [`LockToken`] once every earlier holder released theirs.
/// Cloning a `Lock` yields another handle to the same mutex.
#[derive(Clone)]
pub struct Lock {
    name: Arc<str>,
    state: Arc<Mutex<LockState>>,
}

#[derive(Default)]
struct LockState {
    tail: Option<Link>,
    next_id: u64,
}

impl Lock {
    pub fn new() -> Self {
        Self::named("mutex")
    }

    /// Create a lock whose contention errors report `name` as the key.
    pub fn named(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            state: Arc::new(Mutex::new(LockState::default())),
        }
    }

    /// Wait for the lock.
    ///
    /// The caller's place in the queue is taken when this is called, not when
    /// the returned future is first polled.
    pub fn lock(&self) -> impl Future<Output = LockToken> + Send + 'static {
        let (token, prev) = {
            let mut state = self.state.lock();
            let prev = take_live_tail(&mut state);
            self.push(&mut state, prev)
        };
        async move {
            if let Some(prev) = prev {
                prev.await;
            }
            token
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self) -> Result<LockToken, LockError> {
        let mut state = self.state.lock();
        let prev = take_live_tail(&mut state);
        if prev.is_some() {
            state.tail = prev;
            return Err(LockError::contention(self.name.as_ref()));
        }
        Ok(self.push(&mut state, None).0)
    }

    /// Whether a token is currently outstanding (held or queued).
    pub fn is_held(&self) -> bool {
        self.state
            .lock()
            .tail
            .as_ref()
            .is_some_and(|link| !is_settled(&link.signal))
    }

    fn push(&self, state: &mut LockState, prev: Option<Link>) -> (LockToken, Option<Signal>) {
        let prev = prev.map(|link| link.signal);
        let (tx, rx) = oneshot::channel();
        let id = state.next_id;
        state.next_id += 1;
        state.tail = Some(Link {
            id,
            signal: chain(prev.clone(), rx),
        });

        let token = LockToken {
            id,
            release: Some(tx),
            state: Arc::clone(&self.state),
        };
        (token, prev)
    }
}

/// Remove and return the tail link if it has not settled yet.
fn take_live_tail(state: &mut LockState) -> Option<Link> {
    state.tail.take().filter(|link| !is_settled(&link.signal))
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Release right for one [`Lock`] acquisition.
///
/// Released on [`unlock`](Self::unlock) or drop, whichever comes first.
pub struct LockToken {
    id: u64,
    release: Option<oneshot::Sender<()>>,
    state: Arc<Mutex<LockState>>,
}

impl LockToken {
    /// Release the lock. Calling this twice is a no-op.
    pub fn unlock(&mut self) {
        let Some(tx) = self.release.take() else {
            return;
        };
        let _ = tx.send(());

        let mut state = self.state.lock();
        if state
            .tail
            .as_ref()
            .is_some_and(|link| link.id == self.id && is_settled(&link.signal))
        {
            state.tail = None;
        }
    }

    /// Whether this token still owns its release right.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockToken")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_unlock() {
        let lock = Lock::new();
        assert!(!lock.is_held());

        let mut token = lock.lock().await;
        assert!(lock.is_held());

        token.unlock();
        assert!(!lock.is_held());
        assert!(!token.is_active());
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let lock = Lock::new();
        let mut first = lock.lock().await;
        first.unlock();

        let _second = lock.lock().await;
        // Releasing the stale token again must not free the second holder
        first.unlock();
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_try_lock_fails_when_held() {
        let lock = Lock::named("build");
        let token = lock.lock().await;

        let err = lock.try_lock().unwrap_err();
        assert!(err.to_string().contains("lock fail"));
        assert!(format!("{token:?}").contains("active: true"));
        assert!(err.to_string().contains("build"));

        drop(token);
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifo_order() {
        let lock = Lock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = lock.lock().await;
        let mut handles = Vec::new();
        for i in 0..5 {
            let lock = lock.clone();
            let order = Arc::clone(&order);
            // Enqueue in order; each task only starts waiting after the previous one queued
            let (queued_tx, queued_rx) = oneshot::channel();
            handles.push(tokio::spawn(async move {
                let fut = lock.lock();
                let _ = queued_tx.send(());
                let _token = fut.await;
                order.lock().push(i);
            }));
            let _ = queued_rx.await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_keeps_exclusion() {
        let lock = Lock::new();
        let holder = lock.lock().await;

        // A waiter that gives up before acquiring
        let waiter = tokio::time::timeout(Duration::from_millis(10), lock.lock()).await;
        assert!(waiter.is_err());

        // The holder still excludes everyone else
        assert!(lock.try_lock().is_err());

        drop(holder);
        let acquired = tokio::time::timeout(Duration::from_millis(100), lock.lock()).await;
        assert!(acquired.is_ok());
    }
}
