//! Local key/value cache surviving restarts.
//!
//! The cache is an optimization, never a requirement for correctness: every
//! storage failure is logged and treated as a miss (reads) or a no-op
//! (writes). Authoritative state always comes from the remote store.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

/// Where the cache keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLocation {
    File(PathBuf),
    /// Private in-process database; gone when the process exits.
    Memory,
    /// Storage unavailable; every read misses.
    Disabled,
}

/// One cached value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

/// Cache key builders. Per-user entries are namespaced by email.
pub mod keys {
    pub fn shift(email: &str) -> String {
        format!("f15:shift:{email}")
    }

    pub fn timers(email: &str) -> String {
        format!("f15:timers:{email}")
    }

    pub fn timelog(email: &str) -> String {
        format!("f15:timelog:{email}")
    }

    pub fn lists() -> String {
        "f15:lists".to_string()
    }
}

#[derive(Debug)]
enum PoolState {
    Uninitialized,
    Ready(SqlitePool),
    Unavailable,
}

/// SQLite-backed local cache.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct LocalCache {
    location: CacheLocation,
    pool: Arc<Mutex<PoolState>>,
}

impl LocalCache {
    /// Create a cache at `location` (lazy initialization).
    ///
    /// The database is opened on first use.
    pub fn new(location: CacheLocation) -> Self {
        let state = match location {
            CacheLocation::Disabled => PoolState::Unavailable,
            _ => PoolState::Uninitialized,
        };
        Self {
            location,
            pool: Arc::new(Mutex::new(state)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(CacheLocation::Memory)
    }

    pub fn disabled() -> Self {
        Self::new(CacheLocation::Disabled)
    }

    /// Get the pool, opening the database on first use.
    ///
    /// A failed open marks the cache unavailable for the rest of the process.
    async fn pool(&self) -> Option<SqlitePool> {
        let mut guard = self.pool.lock().await;
        match &*guard {
            PoolState::Ready(pool) => return Some(pool.clone()),
            PoolState::Unavailable => return None,
            PoolState::Uninitialized => {}
        }

        match open_pool(&self.location).await {
            Ok(pool) => {
                *guard = PoolState::Ready(pool.clone());
                Some(pool)
            }
            Err(err) => {
                tracing::warn!("local cache unavailable, continuing without it: {err:?}");
                *guard = PoolState::Unavailable;
                None
            }
        }
    }

    /// Read a value; any failure is a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).await.map(|entry| entry.value)
    }

    /// Read a value together with its metadata.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let pool = self.pool().await?;
        match fetch_entry(&pool, key).await {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key, "failed to read cache entry: {err:?}");
                None
            }
        }
    }

    /// Replace the value stored under `key`.
    pub async fn set(&self, key: &str, value: &Value) {
        let Some(pool) = self.pool().await else {
            return;
        };
        if let Err(err) = upsert_entry(&pool, key, value).await {
            tracing::warn!(key, "failed to write cache entry: {err:?}");
        }
    }

    pub async fn remove(&self, key: &str) {
        let Some(pool) = self.pool().await else {
            return;
        };
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .context("failed to delete cache entry");
        if let Err(err) = result {
            tracing::warn!(key, "{err:?}");
        }
    }

    /// Typed read. A value that no longer decodes is treated as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(key, "discarding undecodable cache entry: {err}");
                None
            }
        }
    }

    /// Typed write.
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, &json).await,
            Err(err) => tracing::warn!(key, "failed to encode cache entry: {err}"),
        }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

async fn open_pool(location: &CacheLocation) -> anyhow::Result<SqlitePool> {
    let options = match location {
        CacheLocation::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create cache directory at {parent:?}"))?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        CacheLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?,
        CacheLocation::Disabled => anyhow::bail!("cache is disabled"),
    };

    // One connection: an in-memory database lives and dies with it, and the
    // cache never needs concurrent writers.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open SQLite cache at {location:?}"))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            stored_at  TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .context("failed to create cache_entries table")?;

    Ok(pool)
}

async fn fetch_entry(pool: &SqlitePool, key: &str) -> anyhow::Result<Option<CacheEntry>> {
    let row = sqlx::query(
        r#"
        SELECT value, stored_at
        FROM cache_entries
        WHERE key = ?1
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    .context("failed to fetch cache entry")?;

    let row = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let raw: String = row.try_get("value")?;
    let stored_at_str: String = row.try_get("stored_at")?;
    let stored_at = DateTime::parse_from_rfc3339(&stored_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .context("invalid stored_at timestamp in cache")?;
    let value = serde_json::from_str(&raw).context("cached value is not valid JSON")?;

    Ok(Some(CacheEntry {
        key: key.to_string(),
        value,
        stored_at,
    }))
}

async fn upsert_entry(pool: &SqlitePool, key: &str, value: &Value) -> anyhow::Result<()> {
    let payload = serde_json::to_string(value).context("failed to serialize cache value")?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO cache_entries (key, value, stored_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key)
        DO UPDATE SET
            value = excluded.value,
            stored_at = excluded.stored_at
        "#,
    )
    .bind(key)
    .bind(&payload)
    .bind(&now)
    .execute(pool)
    .await
    .context("failed to upsert cache entry")?;

    Ok(())
}

/// Resolve the default cache database path:
/// `{app_data_dir}/f15/cache.db`.
pub fn default_cache_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory")?;

    let mut path = base;
    path.push("f15");
    path.push("cache.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove() {
        let cache = LocalCache::in_memory();
        let key = keys::shift("ana@frame15.com");

        assert_eq!(cache.get(&key).await, None);

        cache.set(&key, &json!({"active": null})).await;
        assert_eq!(cache.get(&key).await, Some(json!({"active": null})));

        cache.remove(&key).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn writes_replace_whole_value() {
        let cache = LocalCache::in_memory();
        cache.set("k", &json!({"a": 1, "b": 2})).await;
        cache.set("k", &json!({"a": 3})).await;

        let entry = cache.entry("k").await.unwrap();
        assert_eq!(entry.value, json!({"a": 3}));
        assert_eq!(entry.key, "k");
        assert!(entry.stored_at <= Utc::now());
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let cache = LocalCache::in_memory();
        let other = cache.clone();
        cache.set_as("f15:lists", &vec!["P-1001"]).await;
        assert_eq!(
            other.get_as::<Vec<String>>("f15:lists").await,
            Some(vec!["P-1001".to_string()])
        );
    }

    #[tokio::test]
    async fn undecodable_values_are_misses() {
        let cache = LocalCache::in_memory();
        cache.set("k", &json!("text")).await;
        assert_eq!(cache.get_as::<Vec<u32>>("k").await, None);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = LocalCache::disabled();
        cache.set("k", &json!(1)).await;
        cache.remove("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn unopenable_file_degrades_to_misses() {
        // A directory cannot be opened as a database file.
        let cache = LocalCache::new(CacheLocation::File(std::env::temp_dir()));
        cache.set("k", &json!(1)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[test]
    fn keys_are_namespaced_per_user() {
        assert_eq!(keys::shift("a@b.c"), "f15:shift:a@b.c");
        assert_eq!(keys::timers("a@b.c"), "f15:timers:a@b.c");
        assert_ne!(keys::shift("a@b.c"), keys::shift("x@b.c"));
    }
}
