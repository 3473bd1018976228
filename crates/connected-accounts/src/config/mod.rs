//! Configuration management
//!
//! Consumer credentials and store settings, read from
//! `~/.connected-accounts/config.json` with environment overrides.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::http::DEFAULT_TIMEOUT_SECS;
use crate::provider::builtin::BUILTIN_IDS;

const ENV_PREFIX: &str = "CONNECTED_ACCOUNTS";
/// Overrides `store_secret`
pub const STORE_SECRET_ENV: &str = "CONNECTED_ACCOUNTS_STORE_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("config I/O failed: {0}")]
    Io(String),

    #[error("invalid config file: {0}")]
    Parse(String),
}

/// Get the base directory (`~/.connected-accounts/`)
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".connected-accounts"))
}

/// Get the default config file path
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("config.json"))
}

/// Per-provider application credentials and overrides.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Replaces the provider's default scope when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
    /// Merged over the provider's default authorize parameters
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub auth_params: BTreeMap<String, String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("auth_params", &self.auth_params)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub http_timeout_secs: u64,
    /// Encrypted account store location; `~/.connected-accounts/accounts`
    /// when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            store_dir: None,
            store_secret: None,
            updated_at: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("providers", &self.providers)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("store_dir", &self.store_dir)
            .field("store_secret", &self.store_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{:?}: {}", path, e)))
    }

    /// Write to `path`, keeping a `.json.bak` of the previous file.
    pub fn save(&mut self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| ConfigError::Io(format!("failed to create config directory: {}", e)))?;
        }
        if path.exists() {
            std::fs::copy(path, path.with_extension("json.bak"))
                .map_err(|e| ConfigError::Io(format!("failed to create backup: {}", e)))?;
        }

        self.updated_at = Some(Utc::now().to_rfc3339());
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::Io(format!("failed to write config: {}", e)))?;

        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Override credentials and the store secret from environment-style
    /// lookups (`CONNECTED_ACCOUNTS_TWITTER_CONSUMER_KEY`, ...).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: String| lookup(&key).filter(|v| !v.trim().is_empty());

        for id in BUILTIN_IDS {
            let prefix = format!("{}_{}", ENV_PREFIX, id.to_uppercase());
            let key = lookup(format!("{}_CONSUMER_KEY", prefix));
            let secret = lookup(format!("{}_CONSUMER_SECRET", prefix));
            if key.is_none() && secret.is_none() {
                continue;
            }

            let entry = self.providers.entry(id.to_string()).or_default();
            if let Some(key) = key {
                entry.consumer_key = key;
            }
            if let Some(secret) = secret {
                entry.consumer_secret = secret;
            }
            debug!("Credentials for {} overridden from the environment", id);
        }

        if let Some(secret) = lookup(STORE_SECRET_ENV.to_string()) {
            self.store_secret = Some(secret);
        }
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    pub fn store_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(base_dir()?.join("accounts")),
        }
    }
}
