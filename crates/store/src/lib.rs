//! Kagami stores: bounded result cache and the ephemeral session store.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use kagami_core::{QueryKey, QueryResponse};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::debug;

mod session;

pub use session::SessionStore;

/// Default resident bound for [`ResultCache`].
pub const DEFAULT_CAPACITY: usize = 10;

/// One cached response. Replaced whole, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V = QueryResponse> {
    pub key: QueryKey,
    pub response: V,
    pub inserted_at: DateTime<Utc>,
}

/// Key-addressed cache with a fixed capacity and insertion-order eviction.
///
/// Entries are removed when consumed by [`ResultCache::take`]; otherwise the
/// oldest-inserted entry goes first once `cap` is exceeded. Reads do not refresh order.
pub struct ResultCache<V = QueryResponse> {
    map: FxHashMap<QueryKey, CacheEntry<V>>,
    order: VecDeque<QueryKey>,
    cap: usize,
    evicted: u64,
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<V> ResultCache<V> {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), evicted: 0 }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &QueryKey) -> Option<&CacheEntry<V>> {
        self.map.get(key)
    }

    /// Remove and return the entry; a hit is consumed.
    pub fn take(&mut self, key: &QueryKey) -> Option<CacheEntry<V>> {
        let entry = self.map.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }

    /// Insert or replace. A replaced key counts as newly inserted.
    pub fn put(&mut self, key: QueryKey, response: V) {
        if self.map.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }
        while self.order.len() >= self.cap {
            let Some(old) = self.order.pop_front() else { break };
            self.map.remove(&old);
            self.evicted += 1;
            counter!("result_cache_evicted_total", 1u64);
            debug!(key = %old, "cache: evicted oldest");
        }
        self.order.push_back(key.clone());
        self.map.insert(key.clone(), CacheEntry { key, response, inserted_at: Utc::now() });
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.order.iter()
    }
}
