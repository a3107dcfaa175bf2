//! Runtime configuration for `pastewordsd`.
//!
//! Loaded from a TOML file (default: `config/pastewords.toml`). Every field
//! has a default, so an empty file is a valid configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use pastewords_http::HttpSettings;
use pastewords_storage::StorageConfig;
use pastewords_transfer::{BrokerLimits, LimitsError, SweepConfig, DEFAULT_RESERVED_MARKER};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub http: HttpSection,
    pub storage: StorageSection,
    pub words: WordsSection,
    pub limits: LimitsSection,
    pub cleanup: CleanupSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind: String,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub sqlite_path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WordsSection {
    /// Line-delimited candidate list.
    pub path: PathBuf,
    pub reserved_marker: char,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_payload_bytes: usize,
    pub max_code_len: usize,
    pub allocation_attempts: u32,
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Reservations older than this with no file attached are dropped.
    pub stale_after_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            session_ttl_secs: 3600,
            max_sessions: 10_000,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            sqlite_path: "pastewords.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for WordsSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/words.txt"),
            reserved_marker: DEFAULT_RESERVED_MARKER,
        }
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = BrokerLimits::default();
        Self {
            max_payload_bytes: limits.max_payload_bytes,
            max_code_len: limits.max_code_len,
            allocation_attempts: limits.allocation_attempts,
            store_timeout_ms: limits.store_timeout.as_millis() as u64,
        }
    }
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            stale_after_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid limits: {0}")]
    Limits(#[from] LimitsError),
    #[error("cleanup.interval_secs must be greater than zero")]
    ZeroCleanupInterval,
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_limits().validate()?;
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(ConfigError::ZeroCleanupInterval);
        }
        Ok(())
    }

    pub fn broker_limits(&self) -> BrokerLimits {
        BrokerLimits {
            max_payload_bytes: self.limits.max_payload_bytes,
            max_code_len: self.limits.max_code_len,
            allocation_attempts: self.limits.allocation_attempts,
            store_timeout: Duration::from_millis(self.limits.store_timeout_ms),
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            sqlite_path: self.storage.sqlite_path.clone(),
            max_connections: self.storage.max_connections,
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            enabled: self.cleanup.enabled,
            interval: Duration::from_secs(self.cleanup.interval_secs),
            stale_after: Duration::from_secs(self.cleanup.stale_after_secs),
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            session_ttl: Duration::from_secs(self.http.session_ttl_secs),
            max_sessions: self.http.max_sessions,
        }
    }
}
