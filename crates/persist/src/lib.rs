//! Kagami persistence: durable key -> JSON store and the long-TTL aggregate cache.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

mod aggregate;

pub use aggregate::AggregateCache;

/// One stored value with its wall-clock write time (seconds since epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub json: String,
    pub ts: i64,
}

pub trait DurableStore: Send + Sync {
    fn put(&self, key: &str, json: &str, ts: i64) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<StoredValue>>;
    fn remove(&self, key: &str) -> Result<bool>;
    /// All entries ordered by key.
    fn entries(&self) -> Result<Vec<(String, StoredValue)>>;
}

/// SQLite-backed store. Simple, synchronous; values are small.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("KAGAMI_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init(db, started)
    }

    pub fn open_in_memory() -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open_in_memory().context("opening in-memory sqlite db")?;
        Self::init(db, started)
    }

    fn init(db: rusqlite::Connection, started: std::time::Instant) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                ts    INTEGER NOT NULL
            )",
            [],
        )
        .context("creating kv table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableStore for SqliteStore {
    fn put(&self, key: &str, json: &str, ts: i64) -> Result<()> {
        let started = std::time::Instant::now();
        self.lock()
            .execute(
                "INSERT INTO kv(key, value, ts) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, ts = excluded.ts",
                (key, json, ts),
            )
            .with_context(|| format!("writing kv {}", key))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let started = std::time::Instant::now();
        let db = self.lock();
        let mut stmt = db.prepare("SELECT value, ts FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        let out = match rows.next()? {
            Some(row) => Some(StoredValue { json: row.get(0)?, ts: row.get(1)? }),
            None => None,
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let n = self.lock().execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(n > 0)
    }

    fn entries(&self) -> Result<Vec<(String, StoredValue)>> {
        let db = self.lock();
        let mut stmt = db.prepare("SELECT key, value, ts FROM kv ORDER BY key")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push((row.get(0)?, StoredValue { json: row.get(1)?, ts: row.get(2)? }));
        }
        Ok(out)
    }
}

/// In-memory store for tests and hosts without a writable disk.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredValue>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, key: &str, json: &str, ts: i64) -> Result<()> {
        self.lock().insert(key.to_string(), StoredValue { json: json.to_string(), ts });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.lock().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.lock().remove(key).is_some())
    }

    fn entries(&self) -> Result<Vec<(String, StoredValue)>> {
        Ok(self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl<S: DurableStore + ?Sized> DurableStore for std::sync::Arc<S> {
    fn put(&self, key: &str, json: &str, ts: i64) -> Result<()> {
        (**self).put(key, json, ts)
    }

    fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        (**self).get(key)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }

    fn entries(&self) -> Result<Vec<(String, StoredValue)>> {
        (**self).entries()
    }
}

pub fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".kagami");
        let _ = std::fs::create_dir_all(&p);
        p.push("kagami.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "kagami.db".to_string()
}

pub fn now_ts() -> i64 {
    // seconds since epoch
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_upsert_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let s = SqliteStore::open(path.to_str().unwrap()).unwrap();
        s.put("agg:total", "100", 1).unwrap();
        s.put("agg:total", "120", 2).unwrap();
        s.put("agg:aaa", "1", 3).unwrap();
        assert_eq!(s.get("agg:total").unwrap(), Some(StoredValue { json: "120".into(), ts: 2 }));
        let keys: Vec<String> = s.entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["agg:aaa", "agg:total"]);
        assert!(s.remove("agg:aaa").unwrap());
        assert!(!s.remove("agg:aaa").unwrap());
        assert_eq!(s.get("missing").unwrap(), None);
    }

    #[test]
    fn sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let path = path.to_str().unwrap();
        SqliteStore::open(path).unwrap().put("k", "\"v\"", 9).unwrap();
        let again = SqliteStore::open(path).unwrap();
        assert_eq!(again.get("k").unwrap().map(|v| v.json), Some("\"v\"".into()));
    }
}
