//! Per-model transactions over the residency cache
//!
//! The cache keeps its own structure consistent. The transaction manager adds
//! a lock per model name so multi-step operations (peek then evict, check then
//! reload) are atomic with respect to other operations on the same model.
//! Locks are released by dropping the returned guards.

use modelet_core::ModeletResult;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::debug;

use crate::cache::ResidencyCache;
use crate::locks::LockArena;

/// Hold on a single model taken by a transaction
pub enum ItemLock {
    /// Model is resident and cannot be evicted while held
    Shared(OwnedRwLockReadGuard<()>),
    /// Caller owns the reload of an absent model
    Exclusive(OwnedRwLockWriteGuard<()>),
}

impl ItemLock {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, ItemLock::Exclusive(_))
    }
}

/// Residency cache guarded by per-model locks
pub struct CacheTransactionManager {
    cache: ResidencyCache,
    locks: LockArena,
}

impl CacheTransactionManager {
    pub fn new() -> Self {
        Self::with_cache(ResidencyCache::new())
    }

    pub fn with_cache(cache: ResidencyCache) -> Self {
        Self {
            cache,
            locks: LockArena::new(),
        }
    }

    /// The underlying cache, for single-step operations
    pub fn cache(&self) -> &ResidencyCache {
        &self.cache
    }

    /// Exclusive access to `name`
    pub async fn lock(&self, name: &str) -> OwnedRwLockWriteGuard<()> {
        self.locks.write(name).await
    }

    /// Shared access to `name`
    pub async fn rlock(&self, name: &str) -> OwnedRwLockReadGuard<()> {
        self.locks.read(name).await
    }

    /// Whether `name` is resident
    ///
    /// With `wait_on_item` the answer is taken after any in-flight exclusive
    /// holder has finished.
    pub async fn exists(&self, name: &str, wait_on_item: bool) -> bool {
        if wait_on_item {
            let _guard = self.locks.read(name).await;
            return self.cache.exists(name);
        }
        self.cache.exists(name)
    }

    /// Lock `name` exclusively and remove it from the cache
    ///
    /// The caller finishes the eviction through `ResidencyCache::end_evict`
    /// before dropping the guard. The result carries the removed priority, or
    /// `NotFound` if the model was no longer resident.
    pub async fn start_evict(&self, name: &str) -> (OwnedRwLockWriteGuard<()>, ModeletResult<i64>) {
        let guard = self.locks.write(name).await;
        let removed = self.cache.start_evict(name);
        (guard, removed)
    }

    /// Like `start_evict`, but gives up instead of waiting if `name` is busy
    pub fn try_start_evict(
        &self,
        name: &str,
    ) -> Option<(OwnedRwLockWriteGuard<()>, ModeletResult<i64>)> {
        let guard = self.locks.try_write(name)?;
        let removed = self.cache.start_evict(name);
        Some((guard, removed))
    }

    /// Singleflight entry point for lazy reloads
    ///
    /// Returns `(Shared, true)` if the model is resident: it cannot be evicted
    /// while the lock is held. Returns `(Exclusive, false)` if it is absent: the
    /// caller must reload it, and everyone else asking for `name` waits until
    /// the lock is dropped.
    pub async fn start_reload_if_not_exists(&self, name: &str) -> (ItemLock, bool) {
        if self.cache.exists(name) {
            let guard = self.locks.read(name).await;
            if self.cache.exists(name) {
                return (ItemLock::Shared(guard), true);
            }
        }

        let guard = self.locks.write(name).await;
        // a concurrent winner may have finished the reload while we waited
        if self.cache.exists(name) {
            debug!(model = name, "Model reloaded by a concurrent request");
            return (ItemLock::Shared(guard.downgrade()), true);
        }
        (ItemLock::Exclusive(guard), false)
    }

    /// Drop per-model locks nobody holds
    pub fn trim_locks(&self) -> usize {
        self.locks.trim()
    }
}

impl Default for CacheTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_evict_missing() {
        let txn = CacheTransactionManager::new();
        let (guard, result) = txn.start_evict("iris").await;
        assert!(result.is_err());
        drop(guard);

        txn.cache().add_default("iris").unwrap();
        let (_guard, result) = txn.start_evict("iris").await;
        let priority = result.unwrap();
        assert!(!txn.cache().exists("iris"));
        txn.cache().end_evict("iris", priority, true).unwrap();
        assert!(txn.cache().exists("iris"));
    }

    #[tokio::test]
    async fn test_reload_fast_path_blocks_eviction() {
        let txn = CacheTransactionManager::new();
        txn.cache().add_default("iris").unwrap();

        let (hold, exists) = txn.start_reload_if_not_exists("iris").await;
        assert!(exists);
        assert!(!hold.is_exclusive());
        assert!(txn.try_start_evict("iris").is_none());

        drop(hold);
        let (_guard, result) = txn.try_start_evict("iris").unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_reload_absent_model_is_exclusive() {
        let txn = CacheTransactionManager::new();
        let (hold, exists) = txn.start_reload_if_not_exists("iris").await;
        assert!(!exists);
        assert!(hold.is_exclusive());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reload_singleflight() {
        let txn = Arc::new(CacheTransactionManager::new());
        let reloads = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let txn = txn.clone();
                let reloads = reloads.clone();
                tokio::spawn(async move {
                    let (hold, exists) = txn.start_reload_if_not_exists("iris").await;
                    if !exists {
                        reloads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        txn.cache().add_default("iris").unwrap();
                    }
                    drop(hold);
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert!(txn.cache().exists("iris"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_reload_hands_over_to_next_caller() {
        let txn = Arc::new(CacheTransactionManager::new());
        let (winner, exists) = txn.start_reload_if_not_exists("iris").await;
        assert!(!exists);

        let next = {
            let txn = txn.clone();
            tokio::spawn(async move {
                let (hold, exists) = txn.start_reload_if_not_exists("iris").await;
                (hold.is_exclusive(), exists)
            })
        };

        // winner gives up without adding the model
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(winner);

        let (exclusive, exists) = next.await.unwrap();
        assert!(exclusive);
        assert!(!exists);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exists_waits_for_exclusive_holder() {
        let txn = Arc::new(CacheTransactionManager::new());
        let guard = txn.lock("iris").await;

        let waiter = {
            let txn = txn.clone();
            tokio::spawn(async move { txn.exists("iris", true).await })
        };
        assert!(!txn.exists("iris", false).await);

        txn.cache().add_default("iris").unwrap();
        drop(guard);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_trim_locks() {
        let txn = CacheTransactionManager::new();
        drop(txn.lock("iris").await);
        drop(txn.rlock("mnist").await);
        assert_eq!(txn.trim_locks(), 2);
    }
}
