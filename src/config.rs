use crate::error::{ImportError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const CONFIG_PATH_ENV: &str = "WATCHLIST_IMPORT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tmdb: TmdbConfig,
    pub import: ImportConfig,
    pub storage: StorageConfig,
    /// Address for the Prometheus scrape listener; disabled when unset.
    pub metrics_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Header carrying the user id set by the upstream auth proxy.
    pub user_header: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            user_header: "x-user-id".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TmdbConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub requests_per_min: u64,
    pub max_retries: u32,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.themoviedb.org/3".to_string(),
            timeout_seconds: 10,
            requests_per_min: 2400,
            max_retries: 2,
        }
    }
}

/// Which media-type key is probed first when a title-only record hits the cache.
///
/// Neither order is more correct than the other; a title cached under both
/// types resolves to whichever is probed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheProbeOrder {
    #[default]
    MovieFirst,
    TvFirst,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub id_aware_batch_size: usize,
    pub id_aware_batch_delay_ms: u64,
    pub title_only_batch_size: usize,
    pub save_batch_size: usize,
    pub progress_every_items: usize,
    pub progress_interval_ms: u64,
    pub cache_probe_order: CacheProbeOrder,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            id_aware_batch_size: 5,
            id_aware_batch_delay_ms: 250,
            title_only_batch_size: 20,
            save_batch_size: 100,
            progress_every_items: 10,
            progress_interval_ms: 500,
            cache_probe_order: CacheProbeOrder::MovieFirst,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/watchlist_import.db".to_string(),
        }
    }
}

impl Config {
    /// Loads `config.toml` (or the file named by `WATCHLIST_IMPORT_CONFIG`) and
    /// applies environment overrides. A missing default file is not an error.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let config_path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else if explicit.is_some() {
            return Err(ImportError::Config(format!(
                "Config file '{}' does not exist",
                config_path
            )));
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(path).map_err(|e| {
            ImportError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(key) = std::env::var("TMDB_API_KEY") {
            if !key.trim().is_empty() {
                self.tmdb.api_key = key.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("WATCHLIST_IMPORT_DB") {
            if !path.trim().is_empty() {
                self.storage.database_path = path;
            }
        }
        if let Ok(port) = std::env::var("WATCHLIST_IMPORT_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ImportError::Config(format!("Invalid port '{}'", port)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let import = &self.import;
        if import.id_aware_batch_size == 0
            || import.title_only_batch_size == 0
            || import.save_batch_size == 0
        {
            return Err(ImportError::Config(
                "batch sizes must be greater than zero".to_string(),
            ));
        }
        if import.progress_every_items == 0 {
            return Err(ImportError::Config(
                "progress_every_items must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
