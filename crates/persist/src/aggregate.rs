#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{now_ts, DurableStore};

const KEY_PREFIX: &str = "agg:";

/// Default staleness window for aggregate counts.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Long-lived cache of cheap aggregates (e.g. total catalog size), addressed by a fixed
/// label rather than a filter. Corrupt or unreadable entries are refetched.
pub struct AggregateCache<S> {
    store: S,
    ttl_secs: i64,
    clock: Clock,
}

impl<S: DurableStore> AggregateCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl_secs: ttl.as_secs() as i64, clock: Box::new(now_ts) }
    }

    /// Replace the wall clock (seconds since epoch).
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fresh cached value for `label`, if any.
    pub fn get<T: DeserializeOwned>(&self, label: &str) -> Option<T> {
        let key = format!("{KEY_PREFIX}{label}");
        let stored = match self.store.get(&key) {
            Ok(v) => v?,
            Err(e) => {
                warn!(key = %key, error = %e, "aggregate: store read failed");
                return None;
            }
        };
        if (self.clock)() - stored.ts >= self.ttl_secs {
            debug!(key = %key, "aggregate: expired");
            return None;
        }
        match serde_json::from_str(&stored.json) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "aggregate: corrupt entry; refetching");
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, label: &str, value: &T) -> Result<()> {
        let key = format!("{KEY_PREFIX}{label}");
        let json = serde_json::to_string(value).context("serializing aggregate")?;
        self.store.put(&key, &json, (self.clock)())
    }

    /// Cached value when fresh; otherwise `fetch`, store and return it.
    pub async fn get_or_fetch<T, F, Fut, E>(&self, label: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        if let Some(v) = self.get(label) {
            counter!("aggregate_cache_hit_total", 1u64);
            return Ok(v);
        }
        let value = fetch()
            .await
            .map_err(|e| -> anyhow::Error { e.into() })
            .with_context(|| format!("fetching aggregate {}", label))?;
        if let Err(e) = self.put(label, &value) {
            warn!(label = %label, error = %e, "aggregate: store write failed");
        }
        Ok(value)
    }
}
