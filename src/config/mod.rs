// Configuration and API key storage
//
// Keys are stored in ~/.research-arena/keys.toml (global only, not
// project-level). This file should be automatically gitignored.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::{RunTiming, RUN_TIMEOUT, TICK_INTERVAL};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Application settings loaded from ~/.research-arena/arena.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Base URL of the comparison backend
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Hard run ceiling in seconds; a run with no terminal signal for this
    /// long is cancelled
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Local progress estimator tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_run_timeout_secs() -> u64 {
    RUN_TIMEOUT.as_secs()
}

fn default_tick_interval_ms() -> u64 {
    TICK_INTERVAL.as_millis() as u64
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            run_timeout_secs: default_run_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl ArenaConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".research-arena").join("arena.toml"))
    }

    /// Load settings from disk, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path =
            Self::config_path().ok_or_else(|| anyhow!("Could not determine home directory"))?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: ArenaConfig = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Timing policy for the coordinator
    pub fn timing(&self) -> RunTiming {
        RunTiming {
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        }
    }
}

/// API keys stored in ~/.research-arena/keys.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiKeyStore {
    /// API keys indexed by model id (e.g., "gpt-researcher" -> "sk-...")
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

impl ApiKeyStore {
    pub fn store_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".research-arena").join("keys.toml"))
    }

    /// Load keys from disk
    pub fn load() -> Result<Self> {
        let path =
            Self::store_path().ok_or_else(|| anyhow!("Could not determine home directory"))?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read key store '{}': {}", path.display(), e))?;

        let store: ApiKeyStore = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse key store '{}': {}", path.display(), e))?;

        Ok(store)
    }

    /// Save keys to disk
    pub fn save(&self) -> Result<()> {
        let path =
            Self::store_path().ok_or_else(|| anyhow!("Could not determine home directory"))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    anyhow!(
                        "Failed to create key store directory '{}': {}",
                        parent.display(),
                        e
                    )
                })?;
            }
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| anyhow!("Failed to serialize keys: {}", e))?;

        fs::write(&path, contents)
            .map_err(|e| anyhow!("Failed to write key store '{}': {}", path.display(), e))?;

        // Keys are secrets: owner read/write only on unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, permissions)
                .map_err(|e| anyhow!("Failed to set key store permissions: {}", e))?;
        }

        Ok(())
    }

    pub fn get(&self, model: &str) -> Option<&String> {
        self.api_keys.get(model)
    }

    pub fn set(&mut self, model: impl Into<String>, key: impl Into<String>) {
        self.api_keys.insert(model.into(), key.into());
    }

    pub fn remove(&mut self, model: &str) -> Option<String> {
        self.api_keys.remove(model)
    }

    pub fn clear(&mut self) {
        self.api_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArenaConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.run_timeout_secs, 360);
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.timing(), RunTiming::default());
    }

    #[test]
    fn test_config_parses_with_defaults() {
        let config: ArenaConfig = toml::from_str("").unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timing(), RunTiming::default());

        let config: ArenaConfig = toml::from_str(r#"base_url = "http://example.com""#).unwrap();
        assert_eq!(config.base_url, "http://example.com");
    }

    #[test]
    fn test_config_timing_overrides() {
        let config: ArenaConfig = toml::from_str(
            "run_timeout_secs = 30\ntick_interval_ms = 250\n",
        )
        .unwrap();
        let timing = config.timing();
        assert_eq!(timing.run_timeout, Duration::from_secs(30));
        assert_eq!(timing.tick_interval, Duration::from_millis(250));
        // Base URL still defaults when only timing is overridden
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_key_store_set_get_remove() {
        let mut store = ApiKeyStore::default();
        store.set("gpt-researcher", "sk-123");
        assert_eq!(store.get("gpt-researcher").map(String::as_str), Some("sk-123"));

        assert_eq!(store.remove("gpt-researcher"), Some("sk-123".to_string()));
        assert!(store.get("gpt-researcher").is_none());
    }

    #[test]
    fn test_key_store_roundtrip_toml() {
        let mut store = ApiKeyStore::default();
        store.set("claude", "sk-abc");
        let serialized = toml::to_string_pretty(&store).unwrap();
        let parsed: ApiKeyStore = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.get("claude").map(String::as_str), Some("sk-abc"));
    }
}
