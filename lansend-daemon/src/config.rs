//! Daemon settings, persisted as `config.json` in the config directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use lansend_common::{atomic_write, DEFAULT_CHUNK_SIZE};
use lansend_protocol::{DeviceType, DEFAULT_PORT};

use crate::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Stable per-install identity, generated on first run.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_alias")]
    pub alias: String,
    #[serde(default = "default_device_model")]
    pub device_model: String,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret checked by the /connect handshake.
    #[serde(default)]
    pub auth_code: String,
    #[serde(default = "default_true")]
    pub auto_save: bool,
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// Accept TLS peers with no pinned fingerprint (with a warning).
    #[serde(default)]
    pub allow_unregistered: bool,
    /// Delete the partial destination file when a receive is cancelled.
    #[serde(default = "default_true")]
    pub remove_partial_on_cancel: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

fn default_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_alias() -> String {
    platform::local_hostname()
}

fn default_device_model() -> String {
    "PC".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_save_dir() -> PathBuf {
    platform::default_save_dir()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        // An empty object picks up every serde default.
        serde_json::from_value(serde_json::json!({})).expect("defaults are total")
    }
}

impl Settings {
    /// Load settings from `<config_dir>/config.json`, creating the file
    /// with defaults on first run so the generated device_id persists.
    pub fn load_or_init(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("config.json");

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {:?}", path))?;
            let settings: Settings = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config file {:?}", path))?;
            return Ok(settings);
        }

        let settings = Settings::default();
        settings.save(config_dir)?;
        Ok(settings)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("failed to create config dir {:?}", config_dir))?;
        let path = config_dir.join("config.json");
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("failed to write config file {:?}", path))?;
        Ok(())
    }

    /// Apply a partial settings object from a ModifySettings operation.
    /// Unknown keys are ignored; known keys overwrite.
    pub fn merge(&mut self, patch: &serde_json::Value) -> Result<()> {
        let mut current = serde_json::to_value(&*self)?;
        if let (Some(obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_obj {
                obj.insert(key.clone(), value.clone());
            }
        }
        *self = serde_json::from_value(current).context("invalid settings patch")?;
        Ok(())
    }

    pub fn certs_dir(config_dir: &Path) -> PathBuf {
        config_dir.join("certs")
    }

    pub fn metadata_dir(config_dir: &Path) -> PathBuf {
        config_dir.join("metadata")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 53317);
        assert_eq!(settings.chunk_size, 1024 * 1024);
        assert!(settings.auto_save);
        assert!(settings.remove_partial_on_cancel);
        assert!(!settings.allow_unregistered);
        assert!(!settings.device_id.is_empty());
    }

    #[test]
    fn test_first_run_persists_device_id() {
        let dir = TempDir::new().unwrap();

        let first = Settings::load_or_init(dir.path()).unwrap();
        let second = Settings::load_or_init(dir.path()).unwrap();
        assert_eq!(first.device_id, second.device_id);
    }

    #[test]
    fn test_merge_overwrites_known_keys() {
        let mut settings = Settings::default();
        settings
            .merge(&serde_json::json!({"alias": "den", "port": 53400}))
            .unwrap();
        assert_eq!(settings.alias, "den");
        assert_eq!(settings.port, 53400);
    }

    #[test]
    fn test_merge_ignores_unknown_keys() {
        let mut settings = Settings::default();
        let port = settings.port;
        settings
            .merge(&serde_json::json!({"no_such_setting": 1}))
            .unwrap();
        assert_eq!(settings.port, port);
    }

    #[test]
    fn test_merge_rejects_bad_types() {
        let mut settings = Settings::default();
        assert!(settings.merge(&serde_json::json!({"port": "not-a-port"})).is_err());
    }
}
