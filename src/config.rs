//! Layered runtime configuration for the engine: compiled-in defaults,
//! optionally overridden by a TOML file, then by `DWEB_*` environment
//! variables, then by CLI flags — in increasing precedence order.
//! `DWEB_ACK_TIMEOUT` accepts a human-readable duration (`"10s"`, `"1m"`)
//! rather than a bare integer, parsed with `humantime`.
//!
//! Separates deployment settings the operator controls from the in-memory
//! defaults, merged explicitly across three layers rather than relying on
//! serde field defaults alone, since environment and CLI overrides need to
//! apply after the file is parsed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ACK_QUORUM_DEFAULT: u8 = 2;
pub const MANUAL_REPLICA_LIMIT: u8 = 5;
pub const MAX_REPLICATION_RETRIES: u8 = 3;
pub const MAX_INFLIGHT: u8 = 2;
pub const ACK_TIMEOUT_SECS: u64 = 8;
pub const BACKPRESSURE_THRESHOLD_BYTES: u32 = 512_000;
pub const BACKPRESSURE_QUANTUM_MILLIS: u64 = 25;
pub const PEER_STALENESS_WINDOW_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("ackQuorum must be in [1, maxReplicaTargets]")]
    InvalidAckQuorum,
    #[error("DWEB_ACK_TIMEOUT value {raw:?} is not a valid duration: {source}")]
    InvalidAckTimeout {
        raw: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("maxReplicaTargets must be in [1, {MANUAL_REPLICA_LIMIT}]")]
    InvalidReplicaTarget,
}

/// The engine's runtime configuration, threaded through every component at
/// construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub registry_base_url: String,
    pub registry_api_key: Option<String>,
    pub storage_base_url: Option<String>,

    #[serde(default)]
    pub store_chunk_data: bool,
    #[serde(default)]
    pub upload_chunks_to_storage: bool,
    #[serde(default = "default_true")]
    pub auto_replica_selection: bool,

    #[serde(default = "default_max_replica_targets")]
    pub max_replica_targets: u8,
    #[serde(default = "default_ack_quorum")]
    pub ack_quorum: u8,
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_max_inflight")]
    pub max_inflight: u8,
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold_bytes: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_replica_targets() -> u8 {
    2
}
fn default_ack_quorum() -> u8 {
    ACK_QUORUM_DEFAULT
}
fn default_ack_timeout_secs() -> u64 {
    ACK_TIMEOUT_SECS
}
fn default_max_retries() -> u8 {
    MAX_REPLICATION_RETRIES
}
fn default_max_inflight() -> u8 {
    MAX_INFLIGHT
}
fn default_backpressure_threshold() -> u32 {
    BACKPRESSURE_THRESHOLD_BYTES
}
fn default_chunk_size() -> u32 {
    crate::manifest::DEFAULT_CHUNK_SIZE as u32
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registry_base_url: "http://localhost:8787".to_string(),
            registry_api_key: None,
            storage_base_url: None,
            store_chunk_data: false,
            upload_chunks_to_storage: false,
            auto_replica_selection: true,
            max_replica_targets: default_max_replica_targets(),
            ack_quorum: default_ack_quorum(),
            ack_timeout_secs: default_ack_timeout_secs(),
            max_retries: default_max_retries(),
            max_inflight: default_max_inflight(),
            backpressure_threshold_bytes: default_backpressure_threshold(),
            chunk_size: default_chunk_size(),
            logging: LoggingConfig::default(),
        }
    }
}

/// CLI-flag overrides; every field is optional since flags are only applied
/// when the operator actually passed them.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub registry_base_url: Option<String>,
    pub registry_api_key: Option<String>,
    pub storage_base_url: Option<String>,
}

impl EngineConfig {
    /// Loads a config file if present, then applies environment and CLI
    /// overrides in that order. `path` is optional: if absent or
    /// nonexistent, defaults are used as the base layer.
    pub fn load(
        path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var("DWEB_REGISTRY_BASE_URL") {
            config.registry_base_url = url;
        }
        if let Ok(key) = std::env::var("DWEB_REGISTRY_API_KEY") {
            config.registry_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("DWEB_STORAGE_BASE_URL") {
            config.storage_base_url = Some(url);
        }
        if let Ok(raw) = std::env::var("DWEB_ACK_TIMEOUT") {
            let duration = humantime::parse_duration(&raw).map_err(|source| ConfigError::InvalidAckTimeout {
                raw: raw.clone(),
                source,
            })?;
            config.ack_timeout_secs = duration.as_secs();
        }

        if let Some(url) = overrides.registry_base_url {
            config.registry_base_url = url;
        }
        if let Some(key) = overrides.registry_api_key {
            config.registry_api_key = Some(key);
        }
        if let Some(url) = overrides.storage_base_url {
            config.storage_base_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_replica_targets == 0 || self.max_replica_targets > MANUAL_REPLICA_LIMIT {
            return Err(ConfigError::InvalidReplicaTarget);
        }
        if self.ack_quorum == 0 || self.ack_quorum > self.max_replica_targets {
            return Err(ConfigError::InvalidAckQuorum);
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ack_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // DWEB_REGISTRY_BASE_URL is process-global; serialize tests that touch it
    // so they don't race under a parallel test runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_pass_validation() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn file_value_is_visible_when_no_overrides_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"registry_base_url = "https://registry.example""#).unwrap();
        let config = EngineConfig::load(Some(file.path()), ConfigOverrides::default()).unwrap();
        assert_eq!(config.registry_base_url, "https://registry.example");
    }

    #[test]
    fn environment_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"registry_base_url = "https://from-file""#).unwrap();
        std::env::set_var("DWEB_REGISTRY_BASE_URL", "https://from-env");
        let config = EngineConfig::load(Some(file.path()), ConfigOverrides::default()).unwrap();
        std::env::remove_var("DWEB_REGISTRY_BASE_URL");
        assert_eq!(config.registry_base_url, "https://from-env");
    }

    #[test]
    fn cli_override_beats_environment_and_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"registry_base_url = "https://from-file""#).unwrap();
        std::env::set_var("DWEB_REGISTRY_BASE_URL", "https://from-env");
        let overrides = ConfigOverrides {
            registry_base_url: Some("https://from-cli".to_string()),
            ..Default::default()
        };
        let config = EngineConfig::load(Some(file.path()), overrides).unwrap();
        std::env::remove_var("DWEB_REGISTRY_BASE_URL");
        assert_eq!(config.registry_base_url, "https://from-cli");
    }

    #[test]
    fn ack_timeout_env_var_accepts_human_readable_duration() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("DWEB_ACK_TIMEOUT", "45s");
        let config = EngineConfig::load(None, ConfigOverrides::default()).unwrap();
        std::env::remove_var("DWEB_ACK_TIMEOUT");
        assert_eq!(config.ack_timeout_secs, 45);
    }

    #[test]
    fn invalid_ack_timeout_env_var_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("DWEB_ACK_TIMEOUT", "not-a-duration");
        let result = EngineConfig::load(None, ConfigOverrides::default());
        std::env::remove_var("DWEB_ACK_TIMEOUT");
        assert!(matches!(result, Err(ConfigError::InvalidAckTimeout { .. })));
    }

    #[test]
    fn ack_quorum_above_replica_target_is_rejected() {
        let config = EngineConfig {
            max_replica_targets: 1,
            ack_quorum: 2,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAckQuorum)
        ));
    }
}
