//! Per-scope serialization for mint operations.
//!
//! Two concurrent resolves against the same scope must produce exactly one
//! new alias, so mints are serialized by an async mutex per scope. The
//! lock map is process-local; entries are created on demand and evicted
//! once the last holder releases, so idle scopes cost nothing.
//!
//! # Lock ordering
//!
//! A store-resident mint needs master material. The resolver always
//! resolves the master scope (taking and releasing its lock) *before*
//! acquiring the reference-scope lock, and never holds two scope locks at
//! once — so no lock-order cycle can form.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::scope::KeyScope;

type LockMap = Arc<Mutex<HashMap<KeyScope, Arc<AsyncMutex<()>>>>>;

/// Process-local map of per-scope mint locks.
///
/// Cheaply cloneable; all clones share the same map.
#[derive(Clone, Default)]
pub struct ScopeLocks {
    map: LockMap,
}

impl ScopeLocks {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `scope`, waiting if another resolve holds it.
    ///
    /// The returned guard releases the lock on drop and evicts the map
    /// entry if no other task is using it.
    pub async fn acquire(&self, scope: &KeyScope) -> ScopeGuard {
        let entry = {
            let mut map = self.map.lock();
            Arc::clone(map.entry(scope.clone()).or_default())
        };
        let guard = entry.lock_owned().await;
        ScopeGuard { map: Arc::clone(&self.map), scope: scope.clone(), guard: Some(guard) }
    }

    /// Number of scopes currently tracked. Test helper.
    #[must_use]
    pub fn tracked_scopes(&self) -> usize {
        self.map.lock().len()
    }
}

/// Holds a scope lock until dropped.
pub struct ScopeGuard {
    map: LockMap,
    scope: KeyScope,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        // Release the lock before inspecting the refcount, otherwise the
        // guard's own Arc keeps the entry alive.
        self.guard.take();

        let mut map = self.map.lock();
        if let Some(entry) = map.get(&self.scope) {
            if Arc::strong_count(entry) == 1 {
                map.remove(&self.scope);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release_evicts_entry() {
        let locks = ScopeLocks::new();
        let scope = KeyScope::master("KERNEL");

        {
            let _guard = locks.acquire(&scope).await;
            assert_eq!(locks.tracked_scopes(), 1);
        }
        assert_eq!(locks.tracked_scopes(), 0);
    }

    #[tokio::test]
    async fn test_distinct_scopes_do_not_block_each_other() {
        let locks = ScopeLocks::new();
        let _master = locks.acquire(&KeyScope::master("KERNEL")).await;
        // Must not deadlock: a different scope has its own mutex.
        let _reference = locks.acquire(&KeyScope::new("KERNEL", Some("CLIENT-A"))).await;
        assert_eq!(locks.tracked_scopes(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_scope_is_mutually_exclusive() {
        let locks = ScopeLocks::new();
        let scope = KeyScope::master("KERNEL");
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let scope = scope.clone();
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&scope).await;
                let inside = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(inside, Ordering::SeqCst);
                tokio::task::yield_now().await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1, "critical section must be exclusive");
        assert_eq!(locks.tracked_scopes(), 0, "all entries must be evicted when idle");
    }

    #[tokio::test]
    async fn test_entry_survives_while_another_waiter_exists() {
        let locks = ScopeLocks::new();
        let scope = KeyScope::master("KERNEL");

        let guard = locks.acquire(&scope).await;

        let locks2 = locks.clone();
        let scope2 = scope.clone();
        let waiter = tokio::spawn(async move {
            let _guard = locks2.acquire(&scope2).await;
        });

        // Give the waiter a chance to park on the mutex.
        tokio::task::yield_now().await;
        drop(guard);

        waiter.await.unwrap();
        assert_eq!(locks.tracked_scopes(), 0);
    }
}
