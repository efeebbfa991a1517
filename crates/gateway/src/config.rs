//! Configuration loading for the gateway
//!
//! JSON files with every field optional, then environment overrides:
//! - `HOST`, `PORT` for the listen address
//! - `KESTREL_DATA_DIR` to persist events in files instead of memory

use kestrel_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration for the gateway process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on one call; the outcome is unknown past it
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Directory for the file event log; in-memory when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply `HOST`, `PORT` and `KESTREL_DATA_DIR` from the environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(
        mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a port number: {port}")))?;
        }
        if let Some(dir) = var("KESTREL_DATA_DIR").filter(|d| !d.is_empty()) {
            self.server.data_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.runtime.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "runtime.mailbox_capacity must be positive".to_string(),
            ));
        }
        if self.runtime.max_resident == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_resident must be positive".to_string(),
            ));
        }
        if self.runtime.append_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "runtime.append_retry.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_json("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = GatewayConfig::from_json(
            r#"{
                "server": { "port": 9000 },
                "runtime": { "snapshot_every": 10, "append_retry": { "max_attempts": 2 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.runtime.snapshot_every, 10);
        assert_eq!(config.runtime.append_retry.max_attempts, 2);
        assert_eq!(config.runtime.mailbox_capacity, 1_024);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HOST", "127.0.0.1"),
            ("PORT", "9100"),
            ("KESTREL_DATA_DIR", "/var/lib/kestrel"),
        ]
        .into_iter()
        .collect();
        let config = GatewayConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:9100");
        assert_eq!(
            config.server.data_dir,
            Some(PathBuf::from("/var/lib/kestrel"))
        );
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let err = GatewayConfig::default()
            .with_overrides_from(|k| (k == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = GatewayConfig::default();
        config.runtime.mailbox_capacity = 0;
        assert!(config.validate().is_err());
    }
}
