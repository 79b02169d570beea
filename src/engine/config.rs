//! Runtime Updater Configuration Module
//! Handles loading updater.config.json and the metadata keys the updater reads

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "updater.config.json";

/// Metadata key holding the runtime download URL
pub const META_DOWNLOAD_URL: &str = "runtime_download_url";
/// Metadata key switching artifact verification (`disable`/`false` turn it off)
pub const META_VERIFY: &str = "runtime_verify";
const ARCH_QUERY_KEY: &str = "arch=";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid trusted signer: {0}")]
    InvalidSigner(String),
    #[error("Update listener is not set")]
    MissingListener,
}

/// Key-value metadata lookup
pub trait ConfigurationSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigurationSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Host metadata (download URL, verification switch)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Hex-encoded ed25519 keys the host is signed with
    #[serde(default)]
    pub trusted_signers: Vec<String>,
    /// Runtime version the host was built against
    #[serde(default)]
    pub expected_version: Option<String>,
    /// Overrides the platform data directory
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

impl UpdaterConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        Self::load_file(&dir.join(CONFIG_FILE))
    }

    pub fn load_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: UpdaterConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Metadata map as a configuration source
    pub fn source(&self) -> HashMap<String, String> {
        self.metadata.clone()
    }
}

/// Configured URL with the architecture query appended.
///
/// A missing key resolves to the empty string.
pub fn configured_download_url(source: &dyn ConfigurationSource, arch: &str) -> String {
    match source.get(META_DOWNLOAD_URL) {
        Some(url) if !url.trim().is_empty() => with_arch_query(url.trim(), arch),
        _ => String::new(),
    }
}

fn with_arch_query(url: &str, arch: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}{}", url, separator, ARCH_QUERY_KEY, arch)
}
