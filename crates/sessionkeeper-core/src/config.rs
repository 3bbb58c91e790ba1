//! Application configuration management.
//!
//! This module handles loading and saving the configuration, which includes
//! the auth API location, refresh timing, the storage backend for the token,
//! and the last used username.
//!
//! Configuration is stored at `~/.config/sessionkeeper/config.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::auth::store::{DEFAULT_FALLBACK_LIFETIME_SECS, DEFAULT_REFRESH_THRESHOLD_SECS};
use crate::auth::{FileStorage, KeyringStorage, MemoryStorage, StorageBackend, StoreSettings};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Upper bound for `fallback_token_lifetime_secs` (one year)
const MAX_FALLBACK_LIFETIME_SECS: i64 = 365 * 86_400;

pub const ENV_API_URL: &str = "SESSIONKEEPER_API_URL";
pub const ENV_STORAGE: &str = "SESSIONKEEPER_STORAGE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Could not find cache directory")]
    NoCacheDir,

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown storage backend '{0}' (expected file, keyring or memory)")]
    UnknownStorage(String),
}

/// Where the token pair is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" | "keychain" => Ok(StorageKind::Keyring),
            "memory" => Ok(StorageKind::Memory),
            other => Err(ConfigError::UnknownStorage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_threshold_secs: i64,
    pub fallback_token_lifetime_secs: i64,
    pub storage: StorageKind,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            fallback_token_lifetime_secs: DEFAULT_FALLBACK_LIFETIME_SECS,
            storage: StorageKind::default(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoCacheDir)?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `SESSIONKEEPER_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(storage) = lookup(ENV_STORAGE).filter(|v| !v.trim().is_empty()) {
            self.storage = storage.parse()?;
        }
        Ok(())
    }

    /// Token store timing. Out-of-range values fall back to defaults.
    pub fn store_settings(&self) -> StoreSettings {
        let defaults = StoreSettings::default();

        let fallback_lifetime = match Duration::try_seconds(self.fallback_token_lifetime_secs) {
            Some(lifetime)
                if self.fallback_token_lifetime_secs > 0
                    && self.fallback_token_lifetime_secs <= MAX_FALLBACK_LIFETIME_SECS =>
            {
                lifetime
            }
            _ => {
                warn!(
                    value = self.fallback_token_lifetime_secs,
                    "fallback_token_lifetime_secs out of range, using default"
                );
                defaults.fallback_lifetime
            }
        };

        let refresh_threshold = match Duration::try_seconds(self.refresh_threshold_secs) {
            Some(threshold) if self.refresh_threshold_secs >= 0 && threshold < fallback_lifetime => {
                threshold
            }
            _ => {
                warn!(
                    value = self.refresh_threshold_secs,
                    "refresh_threshold_secs must be non-negative and below the token lifetime, using default"
                );
                defaults.refresh_threshold.min(fallback_lifetime / 2)
            }
        };

        StoreSettings {
            refresh_threshold,
            fallback_lifetime,
        }
    }

    /// Build the configured storage backend.
    pub fn storage_backend(&self) -> Result<Arc<dyn StorageBackend>, ConfigError> {
        Ok(match self.storage {
            StorageKind::File => Arc::new(FileStorage::new(self.cache_dir()?)),
            StorageKind::Keyring => Arc::new(KeyringStorage::new()),
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
        })
    }
}
