//! Keyed, time-boxed memo for derived results.
//!
//! Sits above the pure engine: a hit within the TTL returns the stored value,
//! anything older is recomputed from a fresh snapshot.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

struct CacheEntry<V> {
    value: Arc<V>,
    cached_at: DateTime<Utc>,
}

pub struct TimedMemo<K, V> {
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> TimedMemo<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: DashMap::new() }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached value, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<Arc<V>> {
        let entry = self.entries.get(key)?;
        if now - entry.cached_at < self.ttl {
            Some(Arc::clone(&entry.value))
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(key, CacheEntry { value: Arc::clone(&value), cached_at: Utc::now() });
        value
    }

    /// Returns the cached value or computes, stores and returns a new one.
    /// Errors from `compute` are returned and nothing is stored.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(key) {
            debug!(?key, "memo hit");
            return Ok(hit);
        }
        debug!(?key, "memo miss");
        let value = compute()?;
        Ok(self.insert(key.clone(), value))
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every entry for which `pred` holds.
    pub fn invalidate_where(&self, pred: impl Fn(&K) -> bool) {
        self.entries.retain(|k, _| !pred(k));
    }

    /// Drops stale entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, e| {
            let fresh = now - e.cached_at < self.ttl;
            if !fresh {
                removed += 1;
            }
            fresh
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_within_ttl_skips_compute() {
        let memo: TimedMemo<String, u32> = TimedMemo::new(Duration::minutes(5));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, ()>(42)
        };

        let a = memo.get_or_try_insert_with(&"600036".to_string(), compute).unwrap();
        let b = memo.get_or_try_insert_with(&"600036".to_string(), compute).unwrap();
        assert_eq!((*a, *b), (42, 42));
        assert_eq!(calls.get(), 1);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_expired_entry_recomputed() {
        let memo: TimedMemo<&str, u32> = TimedMemo::new(Duration::seconds(60));
        memo.insert("601088", 1);
        let later = Utc::now() + Duration::seconds(61);
        assert!(memo.get_at(&"601088", later).is_none());
        assert!(memo.get(&"601088").is_some());
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let memo: TimedMemo<&str, u32> = TimedMemo::new(Duration::zero());
        memo.insert("600900", 7);
        assert!(memo.get(&"600900").is_none());
        assert_eq!(memo.purge_expired(), 1);
        assert!(memo.is_empty());
    }

    #[test]
    fn test_purge_counts_only_removed_entries() {
        let memo: TimedMemo<&str, u32> = TimedMemo::new(Duration::seconds(60));
        memo.insert("600036", 1);
        memo.insert("601088", 2);
        assert_eq!(memo.purge_expired_at(Utc::now()), 0);
        assert_eq!(memo.purge_expired_at(Utc::now() + Duration::seconds(61)), 2);
        memo.insert("600900", 3);
        assert_eq!(memo.purge_expired(), 0);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_purge_while_inserting() {
        let memo: TimedMemo<u32, u32> = TimedMemo::new(Duration::zero());
        let purged = std::thread::scope(|s| {
            let writer = s.spawn(|| {
                for k in 0..2_000 {
                    memo.insert(k, k);
                }
            });
            let mut purged = 0;
            while !writer.is_finished() {
                purged += memo.purge_expired();
            }
            writer.join().unwrap();
            purged + memo.purge_expired()
        });
        assert_eq!(purged, 2_000);
        assert!(memo.is_empty());
    }

    #[test]
    fn test_error_is_not_cached() {
        let memo: TimedMemo<&str, u32> = TimedMemo::new(Duration::minutes(1));
        let r: Result<_, &str> = memo.get_or_try_insert_with(&"x", || Err("boom"));
        assert_eq!(r.unwrap_err(), "boom");
        assert!(memo.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let memo: TimedMemo<(&str, u8), u32> = TimedMemo::new(Duration::minutes(1));
        memo.insert(("a", 1), 1);
        memo.insert(("a", 2), 2);
        memo.insert(("b", 1), 3);
        assert!(memo.invalidate(&("b", 1)));
        assert!(!memo.invalidate(&("b", 1)));
        memo.invalidate_where(|(s, _)| *s == "a");
        assert!(memo.is_empty());
    }
}
