//! Worker configuration.
//!
//! The cache name and asset list are the only things that normally change
//! between releases: bumping `cache_name` invalidates every previously stored
//! entry on the next activation.
//!
//! Configuration is stored at `~/.config/pill-time/config.json`. Every field
//! has a default, so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::network::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "pill-time";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Current cache version
pub const DEFAULT_CACHE_NAME: &str = "pill-time-cache-v1";

/// Environment variable overriding the worker scope URL
pub const SCOPE_ENV: &str = "PILL_TIME_SCOPE";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "PILL_TIME_CACHE_DIR";

const DEFAULT_SCOPE: &str = "http://localhost:8080/";

/// What to do when an asset can't be fetched during install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallPolicy {
    /// Fail the install and store nothing
    #[default]
    Strict,
    /// Log the failure and store what succeeded
    Lenient,
}

/// What a fetch returns when the cache misses and the network fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkFailurePolicy {
    /// Return the error to the caller
    Propagate,
    /// Return a synthetic 503 response
    #[default]
    Fallback,
}

fn default_cache_name() -> String {
    DEFAULT_CACHE_NAME.to_string()
}

fn default_assets() -> Vec<String> {
    vec!["./index.html".to_string()]
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_entry_url() -> String {
    "./".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    /// Base URL the worker controls
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Page opened when a notification is clicked and no window is open
    #[serde(default = "default_entry_url")]
    pub entry_url: String,
    #[serde(default)]
    pub install_policy: InstallPolicy,
    #[serde(default)]
    pub network_failure_policy: NetworkFailurePolicy,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// On-disk cache location; the platform cache directory when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: default_cache_name(),
            assets: default_assets(),
            scope: default_scope(),
            entry_url: default_entry_url(),
            install_policy: InstallPolicy::default(),
            network_failure_policy: NetworkFailurePolicy::default(),
            request_timeout_secs: default_timeout(),
            cache_dir: None,
        }
    }
}

impl WorkerConfig {
    /// Load from the default config location, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(scope) = std::env::var(SCOPE_ENV) {
            self.scope = scope;
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Configured cache directory, or the platform cache directory.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Parsed scope URL. A scope without a trailing slash is treated as a
    /// directory.
    pub fn scope_url(&self) -> Result<Url> {
        let mut scope = self.scope.clone();
        if !scope.ends_with('/') {
            scope.push('/');
        }
        Url::parse(&scope).with_context(|| format!("Invalid scope URL: {}", self.scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "pill-time-cache-v1");
        assert_eq!(config.assets, vec!["./index.html".to_string()]);
        assert_eq!(config.install_policy, InstallPolicy::Strict);
        assert_eq!(config.network_failure_policy, NetworkFailurePolicy::Fallback);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{"cache_name": "pill-time-cache-v2", "install_policy": "lenient"}"#,
        )
        .unwrap();
        assert_eq!(config.cache_name, "pill-time-cache-v2");
        assert_eq!(config.install_policy, InstallPolicy::Lenient);
        assert_eq!(config.assets, default_assets());
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, WorkerConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = WorkerConfig {
            assets: vec!["./index.html".to_string(), "./manifest.json".to_string()],
            network_failure_policy: NetworkFailurePolicy::Propagate,
            ..WorkerConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(WorkerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(WorkerConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_scope_url_adds_trailing_slash() {
        let config = WorkerConfig {
            scope: "https://pills.example.com/app".to_string(),
            ..WorkerConfig::default()
        };
        assert_eq!(
            config.scope_url().unwrap().as_str(),
            "https://pills.example.com/app/"
        );
    }
}
