#![forbid(unsafe_code)]

use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Ephemeral per-session key -> JSON store. Every entry is read at most once.
#[derive(Default)]
pub struct SessionStore {
    entries: Mutex<FxHashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.put_raw(key, json),
            Err(e) => debug!(key = %key, error = %e, "session: serialize failed; entry skipped"),
        }
    }

    pub fn put_raw(&self, key: &str, json: String) {
        self.lock().insert(key.to_string(), json);
    }

    /// Remove the entry and decode it. Missing or corrupt entries yield `None`.
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.lock().remove(key)?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key = %key, error = %e, "session: corrupt entry dropped");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
