//! Runtime tunables stored as persisted settings.
//!
//! Lookups are memoized in the cache under `setting_<name>`. Unset or
//! unparsable values fall back to the defaults below.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::CacheStore;
use crate::repository::SettingRepository;

/// Cache key prefix for memoized settings.
pub const SETTING_PREFIX: &str = "setting_";

/// Built-in defaults for every known setting.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("max_worker_num", "10"),
    ("max_parallel_transfer", "4"),
    ("aria2_interval", "10"),
    ("aria2_call_timeout", "5"),
    ("aria2_rpcurl", ""),
    ("aria2_token", ""),
    ("aria2_options", "{}"),
    ("aria2_temp_path", ""),
    ("upload_credential_timeout", "3600"),
    ("upload_session_timeout", "86400"),
    ("slave_api_timeout", "60"),
    ("preview_timeout", "60"),
    ("thumb_width", "400"),
    ("thumb_height", "300"),
];

fn default_for(name: &str) -> &'static str {
    DEFAULTS
        .iter()
        .find(|(key, _)| *key == name)
        .map_or("", |(_, value)| value)
}

/// Memoizing settings reader.
#[derive(Clone)]
pub struct SettingStore {
    repo: Arc<dyn SettingRepository>,
    cache: Arc<dyn CacheStore>,
}

impl SettingStore {
    /// Creates a store.
    #[must_use]
    pub fn new(repo: Arc<dyn SettingRepository>, cache: Arc<dyn CacheStore>) -> Self {
        Self { repo, cache }
    }

    /// Reads a setting as a string.
    pub async fn get(&self, name: &str) -> String {
        let key = format!("{SETTING_PREFIX}{name}");
        if let Some(Value::String(value)) = self.cache.get(&key).await {
            return value;
        }

        let value = match self.repo.get(name).await {
            Ok(Some(value)) => value,
            Ok(None) => default_for(name).to_string(),
            Err(e) => {
                tracing::warn!(setting = name, error = %e, "failed to read setting, using default");
                return default_for(name).to_string();
            }
        };
        self.cache.set(&key, Value::String(value.clone()), None).await;
        value
    }

    /// Reads several settings at once.
    pub async fn get_many(&self, names: &[&str]) -> HashMap<String, String> {
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            out.insert((*name).to_string(), self.get(name).await);
        }
        out
    }

    /// Reads an integer setting, falling back to `default` when unparsable.
    pub async fn get_int(&self, name: &str, default: i64) -> i64 {
        self.get(name).await.trim().parse().unwrap_or(default)
    }

    /// Reads a non-negative integer setting.
    pub async fn get_u64(&self, name: &str, default: u64) -> u64 {
        self.get(name).await.trim().parse().unwrap_or(default)
    }

    /// Writes a setting and drops its memoized value.
    pub async fn set(&self, name: &str, value: &str) -> Result<(), crate::repository::RepoError> {
        self.repo.set(name, value).await?;
        self.cache.delete(&[name.to_string()], SETTING_PREFIX).await;
        Ok(())
    }
}
