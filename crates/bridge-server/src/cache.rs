//! Bounded-capacity LRU cache over `SELECT`-class response envelopes, with
//! a TTL on top of the LRU bound. Only read-only queries are cacheable;
//! writes never invalidate existing entries (TTL bounds staleness, per
//! design).

use bridge_proto::{CellValue, ResponseEnvelope};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub total_requests: AtomicU64,
}

struct CacheEntry {
    response: ResponseEnvelope,
    created_at: Instant,
    access_count: u64,
}

struct Lru {
    entries: HashMap<u64, CacheEntry>,
    /// MRU at the back, LRU at the front.
    order: Vec<u64>,
    max_size: usize,
    ttl: Duration,
}

impl Lru {
    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push(key);
    }

    fn evict_lru(&mut self) -> Option<u64> {
        if self.order.is_empty() {
            return None;
        }
        let key = self.order.remove(0);
        self.entries.remove(&key);
        Some(key)
    }
}

/// Only `SELECT`/`SHOW`/`DESCRIBE`/`EXPLAIN` queries are cacheable.
pub fn is_cacheable(query: &str) -> bool {
    let verb = query
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(verb.as_str(), "SELECT" | "SHOW" | "DESCRIBE" | "EXPLAIN")
}

/// Normalizes query text for cache-key purposes: lowercase, trim, collapse
/// internal whitespace runs to a single space.
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cache_key(normalized_query: &str, params: &[CellValue]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalized_query.hash(&mut hasher);
    for p in params {
        p.as_text().hash(&mut hasher);
    }
    hasher.finish()
}

pub struct QueryCache {
    inner: Mutex<Lru>,
    pub stats: CacheStats,
}

impl QueryCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Lru {
                entries: HashMap::new(),
                order: Vec::new(),
                max_size,
                ttl,
            }),
            stats: CacheStats::default(),
        }
    }

    /// Returns a cached response if present and unexpired, bumping it to
    /// MRU. An expired entry is removed synchronously on lookup.
    pub fn get(&self, query: &str, params: &[CellValue]) -> Option<ResponseEnvelope> {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let key = cache_key(&normalize(query), params);
        let mut lru = self.inner.lock().expect("cache lock poisoned");

        let expired = match lru.entries.get(&key) {
            Some(entry) => entry.created_at.elapsed() > lru.ttl,
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            lru.entries.remove(&key);
            if let Some(pos) = lru.order.iter().position(|k| *k == key) {
                lru.order.remove(pos);
            }
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        lru.touch(key);
        let entry = lru.entries.get_mut(&key).expect("entry present after touch");
        entry.access_count += 1;
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.response.clone())
    }

    /// Inserts or replaces the entry for `(query, params)` at MRU position,
    /// evicting the LRU entry if capacity is exceeded.
    pub fn set(&self, query: &str, params: &[CellValue], response: ResponseEnvelope) {
        let key = cache_key(&normalize(query), params);
        let mut lru = self.inner.lock().expect("cache lock poisoned");

        lru.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: Instant::now(),
                access_count: 0,
            },
        );
        lru.touch(key);

        while lru.entries.len() > lru.max_size {
            if lru.evict_lru().is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries past TTL; run periodically by a sweeper task.
    pub fn sweep_expired(&self) {
        let mut lru = self.inner.lock().expect("cache lock poisoned");
        let ttl = lru.ttl;
        let expired_keys: Vec<u64> = lru
            .entries
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() > ttl)
            .map(|(k, _)| *k)
            .collect();
        for key in expired_keys {
            lru.entries.remove(&key);
            if let Some(pos) = lru.order.iter().position(|k| *k == key) {
                lru.order.remove(pos);
            }
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_select_class_queries_are_cacheable() {
        assert!(is_cacheable("SELECT * FROM users"));
        assert!(is_cacheable("  select 1"));
        assert!(!is_cacheable("INSERT INTO users VALUES (1)"));
        assert!(!is_cacheable("UPDATE users SET x=1"));
    }

    #[test]
    fn hit_after_set_miss_before() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        assert!(cache.get("SELECT 1", &[]).is_none());
        cache.set("SELECT 1", &[], ResponseEnvelope::single_column("n", vec![CellValue::Integer(1)]));
        let hit = cache.get("SELECT 1", &[]);
        assert!(hit.is_some());
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn normalization_makes_equivalent_queries_share_a_key() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        cache.set("  SELECT   1  ", &[], ResponseEnvelope::single_column("n", vec![CellValue::Integer(1)]));
        assert!(cache.get("select 1", &[]).is_some());
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_removed() {
        let cache = QueryCache::new(10, Duration::from_millis(1));
        cache.set("SELECT 1", &[], ResponseEnvelope::single_column("n", vec![CellValue::Integer(1)]));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("SELECT 1", &[]).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.set("SELECT 1", &[], ResponseEnvelope::single_column("n", vec![CellValue::Integer(1)]));
        cache.set("SELECT 2", &[], ResponseEnvelope::single_column("n", vec![CellValue::Integer(2)]));
        // touch 1 so 2 becomes LRU
        cache.get("SELECT 1", &[]);
        cache.set("SELECT 3", &[], ResponseEnvelope::single_column("n", vec![CellValue::Integer(3)]));
        assert!(cache.get("SELECT 2", &[]).is_none());
        assert!(cache.get("SELECT 1", &[]).is_some());
        assert!(cache.get("SELECT 3", &[]).is_some());
        assert_eq!(cache.len(), 2);
    }
}
