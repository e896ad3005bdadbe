// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Proxy configuration: discovery, validation, and the process-wide settings
//! every other application service is built from.
//!
//! Discovery order mirrors the daemon's `--config` flag / env var / default
//! path chain: an explicit path always wins, then `AEGIS_CONFIG_PATH`, then
//! `./aegis-config.yaml`, `~/.aegis/config.yaml`, `/etc/aegis/config.yaml`.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::repository::StorageBackend;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Base64 or hex-encoded 32-byte symmetric key. Production mode refuses
    /// to start without one; local/dev mode generates an ephemeral key.
    #[serde(default)]
    pub master_key: Option<String>,
    #[serde(default = "default_policy_engine_url")]
    pub policy_engine_url: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub tsa_endpoint: Option<String>,
    #[serde(default)]
    pub export_sink: ExportSinkSettings,
    #[serde(default = "default_default_daily_limit")]
    pub default_daily_limit: Decimal,
    #[serde(default = "default_default_monthly_limit")]
    pub default_monthly_limit: Decimal,
    #[serde(default = "default_rate_limit_default_rpm")]
    pub rate_limit_default_rpm: u32,
    #[serde(default = "default_rate_limit_auth_rpm")]
    pub rate_limit_auth_rpm: u32,
    #[serde(default = "default_audit_flush_interval_secs")]
    pub audit_flush_interval_secs: u64,
    #[serde(default = "default_secret_rotation_check_interval_secs")]
    pub secret_rotation_check_interval_secs: u64,
    /// Whether this process is production (enforces `master_key` presence
    /// and rejects `StorageConfig::InMemory`).
    #[serde(default)]
    pub production: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    InMemory,
    Postgres {
        connection_string: String,
    },
}

impl StorageConfig {
    pub fn to_backend(&self) -> StorageBackend {
        match self {
            StorageConfig::InMemory => StorageBackend::InMemory,
            StorageConfig::Postgres { connection_string } => {
                StorageBackend::PostgreSQL(crate::domain::repository::PostgresConfig {
                    connection_string: connection_string.clone(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ExportSinkSettings {
    #[default]
    LocalFilesystem {
        #[serde(default = "default_export_root")]
        root: String,
    },
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        #[serde(default)]
        prefix: String,
    },
}

impl ExportSinkSettings {
    pub fn to_sink_config(&self) -> crate::infrastructure::export_sink::ExportSinkConfig {
        use crate::infrastructure::export_sink::ExportSinkConfig;
        match self {
            ExportSinkSettings::LocalFilesystem { root } => ExportSinkConfig::LocalFilesystem { root: root.clone() },
            ExportSinkSettings::S3 { bucket, region, endpoint, prefix } => ExportSinkConfig::S3 {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                prefix: prefix.clone(),
            },
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8443".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_policy_engine_url() -> String {
    "http://127.0.0.1:9000".to_string()
}
fn default_export_root() -> String {
    "./aegis-exports".to_string()
}
fn default_default_daily_limit() -> Decimal {
    Decimal::from(100)
}
fn default_default_monthly_limit() -> Decimal {
    Decimal::from(2000)
}
fn default_rate_limit_default_rpm() -> u32 {
    60
}
fn default_rate_limit_auth_rpm() -> u32 {
    10
}
fn default_audit_flush_interval_secs() -> u64 {
    10
}
fn default_secret_rotation_check_interval_secs() -> u64 {
    3600
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage: StorageConfig::default(),
            redis_url: default_redis_url(),
            master_key: None,
            policy_engine_url: default_policy_engine_url(),
            webhook_secret: None,
            tsa_endpoint: None,
            export_sink: ExportSinkSettings::default(),
            default_daily_limit: default_default_daily_limit(),
            default_monthly_limit: default_default_monthly_limit(),
            rate_limit_default_rpm: default_rate_limit_default_rpm(),
            rate_limit_auth_rpm: default_rate_limit_auth_rpm(),
            audit_flush_interval_secs: default_audit_flush_interval_secs(),
            secret_rotation_check_interval_secs: default_secret_rotation_check_interval_secs(),
            production: false,
        }
    }
}

impl ProxyConfig {
    /// Resolution order: `explicit` (the `--config` flag), then
    /// `AEGIS_CONFIG_PATH`, then the first of the conventional default
    /// paths that exists. Falls back to `ProxyConfig::default()` if none of
    /// them exist and no explicit path was given.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(&path);
        }
        if let Ok(env_path) = std::env::var("AEGIS_CONFIG_PATH") {
            return Self::load_from(Path::new(&env_path));
        }
        for candidate in Self::default_paths() {
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./aegis-config.yaml")];
        if let Some(home) = dirs_home() {
            paths.push(home.join(".aegis/config.yaml"));
        }
        paths.push(PathBuf::from("/etc/aegis/config.yaml"));
        paths
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.production {
            if self.master_key.is_none() {
                return Err(ConfigError::Invalid(
                    "AEGIS_MASTER_KEY is required in production mode (§7 fatal state error)".into(),
                ));
            }
            if matches!(self.storage, StorageConfig::InMemory) {
                return Err(ConfigError::Invalid("in-memory storage cannot be used in production mode".into()));
            }
        }
        if self.rate_limit_auth_rpm == 0 || self.rate_limit_default_rpm == 0 {
            return Err(ConfigError::Invalid("rate limits must be greater than zero".into()));
        }
        Ok(())
    }

    /// Loads the master key from config, falling back to a freshly generated
    /// one outside production (never in production; `validate` already
    /// refuses to start without one there).
    pub fn resolve_master_key(&self) -> Result<crate::infrastructure::crypto::MasterKey, ConfigError> {
        use crate::infrastructure::crypto::MasterKey;
        match &self.master_key {
            Some(encoded) => {
                let bytes = decode_master_key(encoded)
                    .ok_or_else(|| ConfigError::Invalid("master_key is not valid hex or base64".into()))?;
                MasterKey::from_bytes(&bytes).map_err(|e| ConfigError::Invalid(e.to_string()))
            }
            None if !self.production => Ok(MasterKey::generate()),
            None => Err(ConfigError::Invalid("master_key is required in production mode".into())),
        }
    }
}

fn decode_master_key(encoded: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    if let Ok(bytes) = hex::decode(encoded) {
        return Some(bytes);
    }
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_outside_production() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_without_master_key_is_invalid() {
        let mut config = ProxyConfig { production: true, ..Default::default() };
        config.storage = StorageConfig::Postgres { connection_string: "postgres://x".into() };
        assert!(config.validate().is_err());
        config.master_key = Some("00".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_rejects_in_memory_storage() {
        let config = ProxyConfig {
            production: true,
            master_key: Some("00".repeat(32)),
            storage: StorageConfig::InMemory,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn master_key_round_trips_through_hex() {
        let config = ProxyConfig { master_key: Some("11".repeat(32)), ..Default::default() };
        assert!(config.resolve_master_key().is_ok());
    }
}
