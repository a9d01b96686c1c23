//! Configuration loading and the process-wide mutable config snapshot.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_BASENAME: &str = "fleetcron.config.json";

/// Retry policy shared by job- and step-level HTTP calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub delay_sec: f64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

fn default_backoff() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            delay_sec: 0.0,
            backoff: 1.0,
        }
    }
}

/// Global HTTP defaults, overridable per job and per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDefaults {
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_sec() -> u64 {
    10
}

impl Default for HttpDefaults {
    fn default() -> Self {
        Self {
            timeout_sec: default_timeout_sec(),
            retry: RetryConfig {
                retries: 2,
                delay_sec: 3.0,
                backoff: 1.5,
            },
        }
    }
}

/// Fully resolved, immutable configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mongodb_uri: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_tz")]
    pub tz: String,
    #[serde(default = "default_order_field")]
    pub order_field: String,
    #[serde(default = "default_order_value")]
    pub default_order: i64,
    #[serde(alias = "max_serial", default = "default_max_order")]
    pub max_order: i64,
    #[serde(default)]
    pub http_defaults: HttpDefaults,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

fn default_db_name() -> String {
    "fleetcron".to_string()
}
fn default_tz() -> String {
    "Asia/Seoul".to_string()
}
fn default_order_field() -> String {
    "order".to_string()
}
fn default_order_value() -> i64 {
    9999
}
fn default_max_order() -> i64 {
    10
}

impl Config {
    /// Candidate config paths: next to the current executable, then `~/.fleetcron/`.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                paths.push(dir.join(CONFIG_BASENAME));
            }
        }
        paths.push(home_dir().join(CONFIG_BASENAME));
        paths
    }

    /// Load from the first candidate path that exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::candidate_paths()
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                ConfigError::FileNotFound(home_dir().join(CONFIG_BASENAME).display().to_string())
            })?;
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let cfg: Config = serde_json::from_str(&raw)?;
        if cfg.mongodb_uri.is_empty() {
            return Err(ConfigError::MissingField("mongodb_uri".to_string()));
        }
        Ok(cfg)
    }

    /// The order-field alias list: the configured primary name plus the
    /// fixed legacy names, de-duplicated, primary first.
    pub fn order_field_aliases(&self) -> Vec<String> {
        let mut aliases = Vec::new();
        for key in [self.order_field.as_str(), "order", "serial"] {
            if !aliases.iter().any(|a: &String| a == key) {
                aliases.push(key.to_string());
            }
        }
        aliases
    }
}

/// `~/.fleetcron`, created on first access.
pub fn home_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetcron");
    let _ = std::fs::create_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_fields() {
        let raw = r#"{"mongodb_uri": "mongodb://localhost/test"}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.db_name, "fleetcron");
        assert_eq!(cfg.tz, "Asia/Seoul");
        assert_eq!(cfg.default_order, 9999);
        assert_eq!(cfg.max_order, 10);
        assert_eq!(cfg.http_defaults.timeout_sec, 10);
        assert_eq!(cfg.http_defaults.retry.retries, 2);
    }

    #[test]
    fn legacy_max_serial_alias() {
        let raw = r#"{"mongodb_uri": "m", "max_serial": 25}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.max_order, 25);
    }

    #[test]
    fn order_field_aliases_dedup_and_primary_first() {
        let raw = r#"{"mongodb_uri": "m", "order_field": "serial"}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.order_field_aliases(), vec!["serial", "order"]);
    }

    #[test]
    fn missing_mongodb_uri_is_rejected_by_load_from() {
        let dir = tempdir();
        let path = dir.join("fleetcron.config.json");
        std::fs::write(&path, r#"{"db_name": "x"}"#).unwrap();
        let err = Config::load_from(&path);
        assert!(err.is_err());
        let _ = std::fs::remove_file(&path);
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("fleetcron-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).unwrap();
        p
    }
}
