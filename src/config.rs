use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_ENV: &str = "HEALTHWATCH_CONFIG";
pub const API_KEY_ENV: &str = "NAGIOS_API_KEY";
pub const DEFAULT_CONFIG_PATH: &str = "healthwatch.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub nagios: NagiosConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub dummy_enabled: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            dummy_enabled: true,
        }
    }
}

impl CollectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite file; defaults to `~/.healthwatch/metrics.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NagiosConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub host_to_app_mapping: BTreeMap<String, String>,
}

impl Default for NagiosConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            host_to_app_mapping: BTreeMap::new(),
        }
    }
}

impl NagiosConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_url.is_empty() && !self.host_to_app_mapping.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    /// `NAGIOS_API_KEY` overrides the key from the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_toml(&text)?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.nagios.api_key = key;
            }
        }
        Ok(config)
    }

    /// Config path from the CLI flag, then `HEALTHWATCH_CONFIG`, then the default.
    pub fn resolve_path(flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.interval_ms == 0 {
            return Err(ConfigError::Invalid("collection.interval_ms must be positive".into()));
        }
        if self.nagios.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("nagios.request_timeout_secs must be positive".into()));
        }
        if !self.nagios.api_url.is_empty() && !self.nagios.api_url.starts_with("http") {
            return Err(ConfigError::Invalid(format!(
                "nagios.api_url is not an http(s) URL: {}",
                self.nagios.api_url
            )));
        }
        Ok(())
    }
}
