//! Key/value cache for sessions and memoized settings.
//!
//! Values are stored as JSON so any serializable type can be cached behind
//! one object-safe trait. Key prefixes in use: `callback_` (upload
//! sessions), `download_` (local download sessions), `setting_`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Default cache capacity (number of entries).
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Value could not be converted to or from JSON.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cache store contract.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Writes a value; `ttl` of `None` never expires.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Reads `prefix + key` for each key. Returns found values keyed without
    /// the prefix, plus the keys that were missing.
    async fn gets(&self, keys: &[String], prefix: &str) -> (HashMap<String, Value>, Vec<String>);

    /// Writes each value under `prefix + key`, without expiry.
    async fn sets(&self, values: HashMap<String, Value>, prefix: &str);

    /// Removes `prefix + key` for each key.
    async fn delete(&self, keys: &[String], prefix: &str);
}

impl dyn CacheStore + '_ {
    /// Reads and deserializes a value. Undecodable values count as missing.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    /// Serializes and writes a value.
    pub async fn set_as<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl).await;
        Ok(())
    }
}

#[derive(Clone)]
struct Entry {
    value: Value,
    ttl: Option<Duration>,
}

struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _now: Instant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _now: Instant,
        _current: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// In-process cache backed by Moka.
#[derive(Clone)]
pub struct MemoStore {
    cache: Cache<String, Entry>,
}

impl Default for MemoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoStore {
    /// Creates a store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a store holding at most `max_capacity` entries.
    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl CacheStore for MemoStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.cache.insert(key.to_string(), Entry { value, ttl }).await;
    }

    async fn gets(&self, keys: &[String], prefix: &str) -> (HashMap<String, Value>, Vec<String>) {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for key in keys {
            match self.cache.get(&format!("{prefix}{key}")).await {
                Some(entry) => {
                    found.insert(key.clone(), entry.value);
                }
                None => missing.push(key.clone()),
            }
        }
        (found, missing)
    }

    async fn sets(&self, values: HashMap<String, Value>, prefix: &str) {
        for (key, value) in values {
            self.cache
                .insert(format!("{prefix}{key}"), Entry { value, ttl: None })
                .await;
        }
    }

    async fn delete(&self, keys: &[String], prefix: &str) {
        for key in keys {
            self.cache.invalidate(&format!("{prefix}{key}")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        uid: i64,
        path: String,
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoStore::new());
        let session = Session {
            uid: 1,
            path: "/docs".to_string(),
        };
        store
            .set_as("callback_abc", &session, None)
            .await
            .expect("set");

        let loaded: Option<Session> = store.get_as("callback_abc").await;
        assert_eq!(loaded, Some(session));
        assert_eq!(store.get_as::<Session>("callback_missing").await, None);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = MemoStore::new();
        store
            .set("download_x", json!(1), Some(Duration::from_millis(50)))
            .await;
        assert!(store.get("download_x").await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.get("download_x").await.is_none());
    }

    #[tokio::test]
    async fn test_gets_sets_and_delete_with_prefix() {
        let store = MemoStore::new();
        store
            .sets(
                HashMap::from([
                    ("a".to_string(), json!("1")),
                    ("b".to_string(), json!("2")),
                ]),
                "setting_",
            )
            .await;

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (found, missing) = store.gets(&keys, "setting_").await;
        assert_eq!(found.get("a"), Some(&json!("1")));
        assert_eq!(missing, vec!["c".to_string()]);

        store.delete(&["a".to_string()], "setting_").await;
        assert!(store.get("setting_a").await.is_none());
        assert!(store.get("setting_b").await.is_some());
    }
}
