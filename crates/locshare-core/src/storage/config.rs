//! TOML-based application configuration.
//!
//! Stores:
//! - Durable backend endpoint and credentials
//! - Broker connection settings
//! - Tracking defaults and platform permission grants
//!
//! Configuration is stored at `~/.config/locshare/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;

/// Durable REST backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every durable write.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_backend_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Pub/sub broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_guest")]
    pub login: String,
    #[serde(default = "default_guest")]
    pub passcode: String,
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
    /// Prepended to every logical destination, e.g. `/topic/`.
    #[serde(default = "default_destination_prefix")]
    pub destination_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Heart-beat interval advertised to the broker; 0 disables.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

/// Tracking defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Foreground interval used when background tracking falls back.
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    #[serde(default = "default_background_min_interval_ms")]
    pub background_min_interval_ms: u64,
    #[serde(default = "default_distance_filter_m")]
    pub distance_filter_m: f64,
    /// Timeout for initial-state requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub foreground_permission: bool,
    #[serde(default)]
    pub background_permission: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/locshare/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8080/api".into()
}
fn default_backend_timeout_ms() -> u64 {
    10_000
}
fn default_broker_host() -> String {
    "localhost".into()
}
fn default_broker_port() -> u16 {
    61613
}
fn default_guest() -> String {
    "guest".into()
}
fn default_virtual_host() -> String {
    "/".into()
}
fn default_destination_prefix() -> String {
    "/topic/".into()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_heartbeat_ms() -> u64 {
    10_000
}
fn default_interval_ms() -> u64 {
    5_000
}
fn default_background_min_interval_ms() -> u64 {
    15_000
}
fn default_distance_filter_m() -> f64 {
    10.0
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_ms: default_backend_timeout_ms(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            login: default_guest(),
            passcode: default_guest(),
            virtual_host: default_virtual_host(),
            destination_prefix: default_destination_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            background_min_interval_ms: default_background_min_interval_ms(),
            distance_filter_m: default_distance_filter_m(),
            request_timeout_ms: default_request_timeout_ms(),
            foreground_permission: true,
            background_permission: false,
        }
    }
}

impl TrackingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current
                    .get_mut(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                continue;
            }

            let obj = current
                .as_object_mut()
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
            let existing = obj
                .get(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    if let Ok(n) = value.parse::<u64>() {
                        serde_json::Value::Number(n.into())
                    } else if let Ok(n) = value.parse::<f64>() {
                        serde_json::Number::from_f64(n)
                            .map(serde_json::Value::Number)
                            .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                    } else {
                        return Err(invalid(format!("cannot parse '{value}' as number")));
                    }
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                // Optional strings serialize as null when unset.
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    /// Path of the config file inside the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, creating it with defaults when missing.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.broker.port, 61613);
        assert_eq!(parsed.tracking.default_interval_ms, 5_000);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [backend]
            base_url = "https://example.test/api"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.backend.base_url, "https://example.test/api");
        assert_eq!(parsed.broker.destination_prefix, "/topic/");
        assert!(parsed.tracking.foreground_permission);
        assert!(!parsed.tracking.background_permission);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("broker.host").as_deref(), Some("localhost"));
        assert_eq!(cfg.get("tracking.default_interval_ms").as_deref(), Some("5000"));
        assert!(cfg.get("broker.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = Config::default();
        cfg.set("tracking.background_permission", "true").unwrap();
        cfg.set("broker.port", "61614").unwrap();
        cfg.set("tracking.distance_filter_m", "2.5").unwrap();
        cfg.set("backend.auth_token", "secret").unwrap();

        assert!(cfg.tracking.background_permission);
        assert_eq!(cfg.broker.port, 61614);
        assert_eq!(cfg.tracking.distance_filter_m, 2.5);
        assert_eq!(cfg.backend.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("broker.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("tracking.foreground_permission", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.tracking.foreground_permission);
    }

    #[test]
    fn load_from_missing_path_writes_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.backend.request_timeout_ms, 10_000);

        let mut changed = cfg.clone();
        changed.set("broker.host", "broker.internal").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().broker.host, "broker.internal");
    }
}
