//! Per-key async locks created on first use

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Arena of reader/writer locks keyed by model name
///
/// Locks are created lazily and kept after release; `trim` drops the ones
/// nobody holds or waits on.
#[derive(Default)]
pub struct LockArena {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl LockArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }
        self.locks.entry(key.to_string()).or_default().clone()
    }

    /// Wait for exclusive access to `key`
    pub async fn write(&self, key: &str) -> OwnedRwLockWriteGuard<()> {
        self.get(key).write_owned().await
    }

    /// Wait for shared access to `key`
    pub async fn read(&self, key: &str) -> OwnedRwLockReadGuard<()> {
        self.get(key).read_owned().await
    }

    /// Exclusive access to `key` if nobody else holds it
    pub fn try_write(&self, key: &str) -> Option<OwnedRwLockWriteGuard<()>> {
        self.get(key).try_write_owned().ok()
    }

    /// Drop locks that are neither held nor awaited, returning how many went
    pub fn trim(&self) -> usize {
        let before = self.locks.len();
        // guards and waiters hold their own Arc, the arena holds one
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before.saturating_sub(self.locks.len());
        if removed > 0 {
            debug!(removed = removed, remaining = self.locks.len(), "Trimmed idle locks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_locks_created_lazily() {
        let arena = LockArena::new();
        assert!(arena.is_empty());

        drop(arena.write("iris").await);
        drop(arena.read("iris").await);
        drop(arena.read("mnist").await);
        assert_eq!(arena.len(), 2);
    }

    #[tokio::test]
    async fn test_try_write_respects_holders() {
        let arena = LockArena::new();

        let shared = arena.read("iris").await;
        assert!(arena.try_write("iris").is_none());
        assert!(arena.try_write("mnist").is_some());

        drop(shared);
        assert!(arena.try_write("iris").is_some());
    }

    #[tokio::test]
    async fn test_trim_keeps_held_locks() {
        let arena = LockArena::new();

        let held = arena.write("iris").await;
        drop(arena.write("mnist").await);
        drop(arena.write("resnet").await);

        assert_eq!(arena.trim(), 2);
        assert_eq!(arena.len(), 1);

        drop(held);
        assert_eq!(arena.trim(), 1);
        assert!(arena.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_excludes_same_key_only() {
        let arena = Arc::new(LockArena::new());
        let held = arena.write("iris").await;

        let waiter = {
            let arena = arena.clone();
            tokio::spawn(async move {
                let _guard = arena.write("iris").await;
            })
        };

        // other keys stay available while iris is held
        tokio::time::timeout(Duration::from_secs(1), arena.write("mnist"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
