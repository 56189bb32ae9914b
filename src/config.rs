//! Service configuration.
//!
//! Read from the environment; pipeline parameters may additionally come from
//! a JSON file named by `TUNEHASH_CONFIG`.

use std::path::Path;
use std::{env, fs};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FingerprintError, Result};
use crate::fingerprint::FingerprintConfig;

pub const BIND_VAR: &str = "TUNEHASH_BIND";
pub const DATABASE_VAR: &str = "TUNEHASH_DATABASE_URL";
pub const LOG_VAR: &str = "TUNEHASH_LOG";
pub const CONFIG_VAR: &str = "TUNEHASH_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub fingerprint: FingerprintConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            database_url: "sqlite://tunehash.db".to_string(),
            log_level: "info".to_string(),
            fingerprint: FingerprintConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let fingerprint = match lookup(CONFIG_VAR) {
            Some(path) => load_fingerprint_config(Path::new(&path))?,
            None => defaults.fingerprint,
        };
        fingerprint.validate()?;

        Ok(Self {
            bind_addr: lookup(BIND_VAR).unwrap_or(defaults.bind_addr),
            database_url: lookup(DATABASE_VAR).unwrap_or(defaults.database_url),
            log_level: lookup(LOG_VAR).unwrap_or(defaults.log_level),
            fingerprint,
        })
    }
}

pub fn load_fingerprint_config(path: &Path) -> Result<FingerprintConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        FingerprintError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    let config: FingerprintConfig = serde_json::from_str(&content).map_err(|e| {
        FingerprintError::Configuration(format!("cannot parse {}: {e}", path.display()))
    })?;

    info!(path = %path.display(), "[CONFIG] fingerprint configuration loaded");
    Ok(config)
}
