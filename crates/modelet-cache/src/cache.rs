//! Residency cache ordered by eviction priority
//!
//! Entries with the highest priority are evicted first. Default priorities are
//! the negated monotonic clock, so the least recently touched model always
//! carries the highest priority and LRU falls out of the ordering. Explicit
//! priorities can be mixed in for other policies.

use chrono::{DateTime, Utc};
use modelet_core::{ModeletError, ModeletResult};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

#[derive(Default)]
struct CacheInner {
    /// Current priority per model name
    priorities: HashMap<String, i64>,
    /// (priority, name) pairs, highest priority last
    order: BTreeSet<(i64, String)>,
    /// Last clock value handed out, keeps default priorities strictly decreasing
    last_tick: i64,
}

impl CacheInner {
    fn insert(&mut self, name: &str, priority: i64) -> ModeletResult<()> {
        if self.priorities.contains_key(name) {
            return Err(ModeletError::AlreadyExists(name.to_string()));
        }
        self.priorities.insert(name.to_string(), priority);
        self.order.insert((priority, name.to_string()));
        Ok(())
    }

    fn reprioritize(&mut self, name: &str, priority: i64) -> ModeletResult<()> {
        let current = self
            .priorities
            .get_mut(name)
            .ok_or_else(|| ModeletError::NotFound(name.to_string()))?;
        self.order.remove(&(*current, name.to_string()));
        *current = priority;
        self.order.insert((priority, name.to_string()));
        Ok(())
    }

    fn remove(&mut self, name: &str) -> ModeletResult<i64> {
        let priority = self
            .priorities
            .remove(name)
            .ok_or_else(|| ModeletError::NotFound(name.to_string()))?;
        self.order.remove(&(priority, name.to_string()));
        Ok(priority)
    }
}

/// Set of resident model names with eviction priorities
pub struct ResidencyCache {
    inner: Mutex<CacheInner>,
    /// Clock origin for default priorities
    epoch: Instant,
    /// Wall time at `epoch`, to turn priorities back into access times
    epoch_wall: DateTime<Utc>,
}

impl ResidencyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
        }
    }

    /// Create a cache pre-populated with explicit priorities
    ///
    /// The first occurrence of a name wins; later duplicates are ignored.
    pub fn with_items(items: impl IntoIterator<Item = (String, i64)>) -> Self {
        let cache = Self::new();
        {
            let mut inner = cache.inner.lock();
            for (name, priority) in items {
                if let Err(e) = inner.insert(&name, priority) {
                    debug!(model = %name, priority = priority, error = %e, "Skipping duplicate entry");
                }
            }
        }
        cache
    }

    fn default_priority(&self, inner: &mut CacheInner) -> i64 {
        let now = i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX);
        let tick = now.max(inner.last_tick.saturating_add(1));
        inner.last_tick = tick;
        -tick
    }

    /// Highest priority entry, without removing it
    pub fn peek(&self) -> ModeletResult<(String, i64)> {
        let inner = self.inner.lock();
        inner
            .order
            .last()
            .map(|(priority, name)| (name.clone(), *priority))
            .ok_or(ModeletError::EmptyCache)
    }

    /// Highest priority entry whose name is not in `skip`
    pub fn peek_excluding(&self, skip: &HashSet<String>) -> ModeletResult<(String, i64)> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .rev()
            .find(|(_, name)| !skip.contains(name))
            .map(|(priority, name)| (name.clone(), *priority))
            .ok_or(ModeletError::EmptyCache)
    }

    /// Begin evicting `name`: removes the entry and returns its priority
    pub fn start_evict(&self, name: &str) -> ModeletResult<i64> {
        self.inner.lock().remove(name)
    }

    /// Finish an eviction started with `start_evict`
    ///
    /// With `rollback` the entry is put back with `priority`; otherwise the
    /// removal stands.
    pub fn end_evict(&self, name: &str, priority: i64, rollback: bool) -> ModeletResult<()> {
        if rollback {
            debug!(model = name, priority = priority, "Rolling back eviction");
            self.inner.lock().insert(name, priority)
        } else {
            debug!(model = name, "Eviction committed");
            Ok(())
        }
    }

    /// Remove and return the highest priority entry
    pub fn evict(&self) -> ModeletResult<(String, i64)> {
        let mut inner = self.inner.lock();
        let (priority, name) = inner.order.pop_last().ok_or(ModeletError::EmptyCache)?;
        inner.priorities.remove(&name);
        Ok((name, priority))
    }

    /// Add an entry with an explicit priority
    pub fn add(&self, name: &str, priority: i64) -> ModeletResult<()> {
        self.inner.lock().insert(name, priority)
    }

    /// Add an entry as the most recently touched
    pub fn add_default(&self, name: &str) -> ModeletResult<()> {
        let mut inner = self.inner.lock();
        let priority = self.default_priority(&mut inner);
        inner.insert(name, priority)
    }

    /// Change the priority of an existing entry
    pub fn update(&self, name: &str, priority: i64) -> ModeletResult<()> {
        self.inner.lock().reprioritize(name, priority)
    }

    /// Mark an existing entry as the most recently touched
    pub fn update_default(&self, name: &str) -> ModeletResult<()> {
        let mut inner = self.inner.lock();
        let priority = self.default_priority(&mut inner);
        inner.reprioritize(name, priority)
    }

    /// Insert as most recently touched, or refresh if already present
    pub fn touch(&self, name: &str) {
        let mut inner = self.inner.lock();
        let priority = self.default_priority(&mut inner);
        if inner.reprioritize(name, priority).is_err() {
            // absent, so insert cannot collide
            let _ = inner.insert(name, priority);
        }
    }

    pub fn delete(&self, name: &str) -> ModeletResult<()> {
        self.inner.lock().remove(name).map(|_| ())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.lock().priorities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> ModeletResult<i64> {
        self.inner
            .lock()
            .priorities
            .get(name)
            .copied()
            .ok_or_else(|| ModeletError::NotFound(name.to_string()))
    }

    /// All entries in eviction order (next candidate first)
    pub fn get_items(&self) -> Vec<(String, i64)> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .rev()
            .map(|(priority, name)| (name.clone(), *priority))
            .collect()
    }

    /// Wall-clock time of the last default touch of `name`
    ///
    /// Returns `None` if the model is absent or carries an explicit priority.
    pub fn last_accessed(&self, name: &str) -> Option<DateTime<Utc>> {
        let priority = self.get(name).ok()?;
        if priority >= 0 {
            return None;
        }
        Some(self.epoch_wall + chrono::Duration::nanoseconds(-priority))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().priorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResidencyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn drain(cache: &ResidencyCache) -> Vec<String> {
        let mut evicted = Vec::new();
        while let Ok((name, _)) = cache.evict() {
            evicted.push(name);
        }
        evicted
    }

    #[test]
    fn test_cache_smoke() {
        let cache = ResidencyCache::with_items(vec![
            ("model_1".to_string(), 1),
            ("model_2".to_string(), 2),
            ("model_3".to_string(), 3),
        ]);
        assert_eq!(cache.get_items().len(), 3);

        cache.add("model_6", 6).unwrap();
        assert_eq!(cache.len(), 4);
        assert!(cache.exists("model_6"));

        cache.delete("model_6").unwrap();
        assert!(!cache.exists("model_6"));
        assert!(!cache.exists("model_dummy"));

        assert_eq!(cache.get("model_1").unwrap(), 1);
        cache.update("model_1", 7).unwrap();
        assert_eq!(cache.get("model_1").unwrap(), 7);

        assert_eq!(cache.peek().unwrap(), ("model_1".to_string(), 7));
        assert_eq!(drain(&cache), vec!["model_1", "model_3", "model_2"]);
    }

    #[test]
    fn test_initial_items_keep_first_duplicate() {
        let cache = ResidencyCache::with_items(vec![
            ("model_1".to_string(), 1),
            ("model_2".to_string(), 2),
            ("model_1".to_string(), 9),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("model_1").unwrap(), 1);

        let mut items = cache.get_items();
        items.sort();
        assert_eq!(
            items,
            vec![("model_1".to_string(), 1), ("model_2".to_string(), 2)]
        );

        cache.delete("model_1").unwrap();
        assert_eq!(drain(&cache), vec!["model_2"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_and_duplicate_entries() {
        let cache = ResidencyCache::new();
        assert!(matches!(cache.peek(), Err(ModeletError::EmptyCache)));
        assert!(matches!(cache.evict(), Err(ModeletError::EmptyCache)));
        assert!(matches!(cache.delete("iris"), Err(ModeletError::NotFound(_))));
        assert!(matches!(cache.update_default("iris"), Err(ModeletError::NotFound(_))));
        assert!(matches!(cache.start_evict("iris"), Err(ModeletError::NotFound(_))));

        cache.add_default("iris").unwrap();
        assert!(matches!(
            cache.add_default("iris"),
            Err(ModeletError::AlreadyExists(_))
        ));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_default_priority_evicts_oldest_first() {
        let cache = ResidencyCache::new();
        for i in 0..100 {
            cache.add_default(&format!("model_{}", i)).unwrap();
        }

        let expected: Vec<String> = (0..100).map(|i| format!("model_{}", i)).collect();
        assert_eq!(drain(&cache), expected);
    }

    #[test]
    fn test_refreshed_entry_outlives_untouched() {
        let cache = ResidencyCache::new();
        cache.add_default("a").unwrap();
        cache.add_default("b").unwrap();
        cache.add_default("c").unwrap();

        cache.update_default("a").unwrap();
        assert_eq!(drain(&cache), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_two_phase_eviction() {
        let cache = ResidencyCache::new();
        cache.add_default("a").unwrap();
        cache.add_default("b").unwrap();

        let (name, priority) = cache.peek().unwrap();
        assert_eq!(name, "a");

        assert_eq!(cache.start_evict("a").unwrap(), priority);
        assert!(!cache.exists("a"));

        cache.end_evict("a", priority, true).unwrap();
        assert_eq!(cache.get("a").unwrap(), priority);
        assert_eq!(cache.peek().unwrap().0, "a");

        let priority = cache.start_evict("a").unwrap();
        cache.end_evict("a", priority, false).unwrap();
        assert!(!cache.exists("a"));
        assert_eq!(cache.get_items().len(), 1);
    }

    #[test]
    fn test_peek_excluding() {
        let cache = ResidencyCache::new();
        cache.add_default("a").unwrap();
        cache.add_default("b").unwrap();

        let skip: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(cache.peek_excluding(&skip).unwrap().0, "b");

        let skip: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert!(matches!(
            cache.peek_excluding(&skip),
            Err(ModeletError::EmptyCache)
        ));
    }

    #[test]
    fn test_touch_inserts_or_refreshes() {
        let cache = ResidencyCache::new();
        cache.touch("a");
        cache.add_default("b").unwrap();
        cache.touch("a");
        assert_eq!(cache.peek().unwrap().0, "b");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_last_accessed() {
        let before = Utc::now();
        let cache = ResidencyCache::new();
        cache.add_default("a").unwrap();
        cache.add("static", 10).unwrap();

        let accessed = cache.last_accessed("a").unwrap();
        assert!(accessed >= before - chrono::Duration::seconds(1));
        assert!(accessed <= Utc::now() + chrono::Duration::seconds(1));
        assert!(cache.last_accessed("static").is_none());
        assert!(cache.last_accessed("missing").is_none());
    }

    #[test]
    fn test_concurrent_explicit_priorities() {
        let cache = Arc::new(ResidencyCache::new());
        let workers = 8;
        let per_worker = 500;

        std::thread::scope(|scope| {
            for w in 0..workers {
                let cache = cache.clone();
                scope.spawn(move || {
                    for i in 0..per_worker {
                        let id = w * per_worker + i;
                        cache.add(&format!("model_{}", id), id as i64).unwrap();
                    }
                });
            }
        });

        assert_eq!(cache.len(), workers * per_worker);

        let mut expected = workers * per_worker;
        while let Ok((name, priority)) = cache.evict() {
            expected -= 1;
            assert_eq!(name, format!("model_{}", expected));
            assert_eq!(priority, expected as i64);
        }
        assert_eq!(expected, 0);
    }

    #[test]
    fn test_concurrent_default_touches_stay_consistent() {
        let cache = Arc::new(ResidencyCache::new());

        std::thread::scope(|scope| {
            for w in 0..4 {
                let cache = cache.clone();
                scope.spawn(move || {
                    for i in 0..200 {
                        let name = format!("model_{}", (w * 200 + i) % 50);
                        cache.touch(&name);
                        if i % 7 == 0 {
                            let _ = cache.delete(&name);
                        }
                    }
                });
            }
        });

        let items = cache.get_items();
        assert_eq!(items.len(), cache.len());
        for window in items.windows(2) {
            assert!(window[0].1 > window[1].1);
        }
    }
}
