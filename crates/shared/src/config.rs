//! Application configuration management.
//!
//! Static, process-level settings live here. Runtime tunables (worker count,
//! aria2 endpoint, session TTLs) are persisted settings read through the core
//! crate's setting store instead.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// JWT configuration.
    pub jwt: JwtSection,
    /// Local storage layout.
    #[serde(default)]
    pub storage: StorageSection,
    /// Public site settings used to build callback and signed URLs.
    pub site: SiteConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5212
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// JWT configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSection {
    /// Secret key for verifying tokens.
    pub secret: String,
    /// Access token expiration in seconds.
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: u64,
}

fn default_access_token_expiry() -> u64 {
    3600
}

/// Where local policies and scratch files live on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Root directory for the `local` policy type.
    #[serde(default = "default_upload_root")]
    pub upload_root: String,
    /// Scratch directory for archives and staged downloads.
    #[serde(default = "default_temp_path")]
    pub temp_path: String,
    /// Suffix appended to a source name to locate its thumbnail.
    #[serde(default = "default_thumb_suffix")]
    pub thumb_suffix: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            upload_root: default_upload_root(),
            temp_path: default_temp_path(),
            thumb_suffix: default_thumb_suffix(),
        }
    }
}

fn default_upload_root() -> String {
    "uploads".to_string()
}

fn default_temp_path() -> String {
    "temp".to_string()
}

fn default_thumb_suffix() -> String {
    "._thumb".to_string()
}

/// Public site configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Externally reachable base URL, e.g. `https://drive.example.com`.
    pub url: String,
    /// Secret used to sign download and preview URLs.
    pub secret_key: String,
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("STRATUS").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
