// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Expiring Cache
//!
//! Keyed values with a time-to-live, so a recently fetched result can be
//! reused without another metered read.
//!
//! # Flow
//!
//! ```text
//! get(key)
//!    │
//!    ├─→ absent              → miss
//!    ├─→ now ≥ expires_at    → remove, miss (counted as expired)
//!    └─→ otherwise           → hit, clone of data
//! ```
//!
//! There is no size bound and no background sweep. Keys come from a small
//! enumerable set of query shapes, and an expired entry is removed by the
//! read that finds it.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Smallest TTL an entry can carry; keeps `expires_at > created_at`.
const MIN_TTL: Duration = Duration::from_millis(1);

/// One cached value.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(data: V, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            data,
            created_at,
            expires_at: created_at + ttl.max(MIN_TTL),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    /// Includes expired lookups
    pub misses: u64,
    pub expired: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// TTL cache over a concurrent map. Safe to share between tasks.
pub struct ExpiringCache<K, V> {
    name: &'static str,
    entries: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `name` labels this cache's metrics.
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup(self.name, "hit");
                return Some(entry.data.clone());
            }
            drop(entry); // release the shard read lock before removing
            // A concurrent refresh may have replaced the entry in between.
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            self.expired.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup(self.name, "expired");
        } else {
            crate::metrics::record_cache_lookup(self.name, "miss");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, CacheEntry::new(value, ttl));
        crate::metrics::set_cache_entries(self.name, self.entries.len());
    }

    pub fn set_default(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key matches. Returns how many were removed.
    pub fn invalidate_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !pred(k));
        let removed = before.saturating_sub(self.entries.len());
        crate::metrics::set_cache_entries(self.name, self.entries.len());
        removed
    }

    /// Entry with its timestamps, expired or not. Does not count as a lookup.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Stored entries, including expired ones not yet read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        crate::metrics::set_cache_entries(self.name, 0);
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            expired: self.expired.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}
