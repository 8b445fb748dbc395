//! Stale-While-Revalidate Cache
//!
//! ## Responsibility
//! Bounded, TTL'd key/value store keyed by request fingerprints. Fresh
//! entries are served directly; entries past their TTL but inside the
//! staleness window are served once more while exactly one caller is handed a
//! [`RefreshClaim`] to revalidate them in the background.
//!
//! ## Guarantees
//! - Bounded: at most `capacity` entries, least-recently-used evicted first
//! - At most one outstanding [`RefreshClaim`] per key; the claim is released
//!   when dropped, whether or not the refresh succeeded
//! - Entries older than `ttl + max_stale` are never returned
//!
//! ## NOT Responsible For
//! - Running refreshes (the orchestrator spawns them)
//! - Deciding what is cacheable (the pipeline's cache-write step)
//!
//! ## Usage
//!
//! ```no_run
//! use tokio_translation_orchestrator::cache::{Lookup, SwrCache};
//! use tokio_translation_orchestrator::config::CacheConfig;
//!
//! let cache: SwrCache<String> = SwrCache::new(&CacheConfig::default());
//! cache.set("fp", "Hallo".to_string());
//! assert!(matches!(cache.get("fp"), Lookup::Fresh(v) if v == "Hallo"));
//! ```

pub mod fingerprint;

pub use fingerprint::{detect_category, fingerprint};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::metrics;

/// Result of a cache read.
#[derive(Debug)]
pub enum Lookup<V> {
    /// Entry younger than the TTL.
    Fresh(V),
    /// Entry past its TTL but inside the staleness window.
    Stale {
        /// The stale value, still usable.
        value: V,
        /// Present for exactly one reader until the claim is dropped.
        claim: Option<RefreshClaim>,
    },
    /// No usable entry.
    Miss,
}

/// Exclusive right to refresh one key. Dropping it releases the key.
#[derive(Debug)]
pub struct RefreshClaim {
    key: String,
    refreshing: Arc<Mutex<HashSet<String>>>,
}

impl RefreshClaim {
    /// Key this claim covers.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RefreshClaim {
    fn drop(&mut self) {
        self.refreshing.lock().remove(&self.key);
    }
}

/// Cache counters and occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Fresh reads.
    pub hits: u64,
    /// Fresh misses, including expired-beyond-stale entries.
    pub misses: u64,
    /// Stale reads.
    pub stale_hits: u64,
    /// Successful writes.
    pub stored: u64,
    /// Refresh claims handed out.
    pub refreshes: u64,
    /// Current entry count.
    pub size: usize,
    /// Maximum entry count.
    pub capacity: usize,
    /// `(hits + stale_hits) / lookups`, or 0 before any lookup.
    pub hit_rate: f64,
}

enum Read<V> {
    Fresh(V),
    Stale(V),
    Absent,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    stored: AtomicU64,
    refreshes: AtomicU64,
}

/// LRU-bounded stale-while-revalidate cache.
pub struct SwrCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    refreshing: Arc<Mutex<HashSet<String>>>,
    counters: Counters,
    enabled: bool,
    capacity: usize,
    ttl: Duration,
    max_stale: Duration,
    update_age_on_get: bool,
}

impl<V: Clone> SwrCache<V> {
    /// Build a cache from configuration. A zero capacity is raised to 1.
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            counters: Counters::default(),
            enabled: config.enabled,
            capacity: capacity.get(),
            ttl: config.ttl(),
            max_stale: config.max_stale(),
            update_age_on_get: config.update_age_on_get,
        }
    }

    /// Whether reads and writes are active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Read `key`, classifying the entry by age.
    pub fn get(&self, key: &str) -> Lookup<V> {
        if !self.enabled {
            return Lookup::Miss;
        }

        let now = Instant::now();
        let read = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                None => Read::Absent,
                Some(entry) => {
                    let age = now.saturating_duration_since(entry.stored_at);
                    if age < self.ttl {
                        if self.update_age_on_get {
                            entry.stored_at = now;
                        }
                        Read::Fresh(entry.value.clone())
                    } else if age < self.ttl + self.max_stale {
                        Read::Stale(entry.value.clone())
                    } else {
                        entries.pop(key);
                        Read::Absent
                    }
                }
            }
        };

        match read {
            Read::Fresh(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_lookup("fresh");
                Lookup::Fresh(value)
            }
            Read::Stale(value) => {
                self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_lookup("stale");
                Lookup::Stale {
                    value,
                    claim: self.claim(key),
                }
            }
            Read::Absent => self.miss(),
        }
    }

    fn miss(&self) -> Lookup<V> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::inc_cache_lookup("miss");
        Lookup::Miss
    }

    fn claim(&self, key: &str) -> Option<RefreshClaim> {
        let mut refreshing = self.refreshing.lock();
        if !refreshing.insert(key.to_string()) {
            return None;
        }
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!("cache: refresh claimed");
        Some(RefreshClaim {
            key: key.to_string(),
            refreshing: Arc::clone(&self.refreshing),
        })
    }

    /// Store `value` under `key`, resetting its age.
    pub fn set(&self, key: impl Into<String>, value: V) {
        if !self.enabled {
            return;
        }
        self.entries.lock().put(
            key.into(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        self.counters.stored.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` only for a fresh entry. Does not touch LRU order or counters.
    pub fn has(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|e| now.saturating_duration_since(e.stored_at) < self.ttl)
    }

    /// Remove `key`. Returns whether an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a refresh for `key` is outstanding.
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.refreshing.lock().contains(key)
    }

    /// Counter and occupancy snapshot.
    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let stale_hits = self.counters.stale_hits.load(Ordering::Relaxed);
        let lookups = hits + misses + stale_hits;
        CacheStats {
            hits,
            misses,
            stale_hits,
            stored: self.counters.stored.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (hits + stale_hits) as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_s: u64, max_stale_s: u64) -> SwrCache<String> {
        SwrCache::new(&CacheConfig {
            capacity: 3,
            ttl_s,
            max_stale_s,
            ..CacheConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_returns_equal_value() {
        let cache = cache(60, 60);
        cache.set("k", "v".to_string());
        assert!(matches!(cache.get("k"), Lookup::Fresh(v) if v == "v"));
        assert!(cache.has("k"));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().stored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_hands_out_exactly_one_claim() {
        let cache = cache(60, 600);
        cache.set("k", "old".to_string());
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!cache.has("k"), "stale entries are not fresh");

        let first = cache.get("k");
        let second = cache.get("k");
        let claim = match first {
            Lookup::Stale { value, claim } => {
                assert_eq!(value, "old");
                claim.expect("test: first stale reader claims the refresh")
            }
            other => panic!("expected stale, got {other:?}"),
        };
        assert!(matches!(second, Lookup::Stale { claim: None, .. }));

        let stats = cache.stats();
        assert_eq!(stats.stale_hits, 2);
        assert_eq!(stats.refreshes, 1);

        assert!(cache.is_refreshing("k"));
        drop(claim);
        assert!(!cache.is_refreshing("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_after_refresh_makes_entry_fresh_again() {
        let cache = cache(60, 600);
        cache.set("k", "old".to_string());
        tokio::time::advance(Duration::from_secs(90)).await;

        let Lookup::Stale { claim: Some(claim), .. } = cache.get("k") else {
            panic!("expected claimed stale read");
        };
        cache.set(claim.key().to_string(), "new".to_string());
        drop(claim);

        assert!(matches!(cache.get("k"), Lookup::Fresh(v) if v == "new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_past_stale_window_are_removed() {
        let cache = cache(60, 30);
        cache.set("k", "v".to_string());
        tokio::time::advance(Duration::from_secs(91)).await;
        assert!(matches!(cache.get("k"), Lookup::Miss));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_age_on_get_extends_freshness() {
        let cache: SwrCache<String> = SwrCache::new(&CacheConfig {
            ttl_s: 60,
            update_age_on_get: true,
            ..CacheConfig::default()
        });
        cache.set("k", "v".to_string());
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(matches!(cache.get("k"), Lookup::Fresh(_)));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(matches!(cache.get("k"), Lookup::Fresh(_)));
    }

    #[tokio::test]
    async fn test_lru_eviction_drops_least_recent() {
        let cache = cache(60, 60);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());
        let _ = cache.get("a");
        cache.set("d", "4".to_string());

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = cache(60, 60);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let cache: SwrCache<String> = SwrCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.set("k", "v".to_string());
        assert!(matches!(cache.get("k"), Lookup::Miss));
        assert_eq!(cache.stats().stored, 0);
    }

    #[test]
    fn test_hit_rate_counts_stale_hits() {
        let cache = cache(60, 60);
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.set("k", "v".to_string());
        let _ = cache.get("k");
        let _ = cache.get("missing");
        assert!((cache.stats().hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
