//! Tracker configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. The value is built once and passed into each component.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use limitchain_core::data::{GovernorConfig, TushareConfig};
use limitchain_core::limit::LimitRules;

/// Environment variable consulted when `provider.token` is empty.
pub const TOKEN_ENV: &str = "LIMITCHAIN_TUSHARE_TOKEN";

/// Largest chunk that keeps a nine-column insert under 999 bound parameters.
const MAX_WRITE_CHUNK: usize = 110;
/// Upper bound on Tushare call attempts, retries included.
const MAX_PROVIDER_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub write_chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/limitchain.db"),
            write_chunk_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Default start of a full backfill.
    pub history_start: NaiveDate,
    /// Window of a recent run.
    pub recent_days: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            history_start: NaiveDate::from_ymd_opt(2025, 10, 9).unwrap_or_default(),
            recent_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_calls: u32,
    pub pause_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_calls: 195,
            pause_ms: 500,
        }
    }
}

impl RateLimitConfig {
    pub fn governor(&self) -> GovernorConfig {
        GovernorConfig {
            enabled: self.enabled,
            max_calls: self.max_calls,
            pause: Duration::from_millis(self.pause_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Tushare,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub token: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub csv_dir: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Tushare,
            token: String::new(),
            base_url: "http://api.tushare.pro".into(),
            timeout_secs: 30,
            max_attempts: 2,
            csv_dir: PathBuf::from("data/bars"),
        }
    }
}

impl ProviderConfig {
    /// Configured token, falling back to the environment.
    pub fn resolved_token(&self) -> String {
        if !self.token.is_empty() {
            return self.token.clone();
        }
        std::env::var(TOKEN_ENV).unwrap_or_default()
    }

    pub fn tushare(&self) -> TushareConfig {
        TushareConfig {
            token: self.resolved_token(),
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            ..TushareConfig::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Optional TOML instrument list. When set it replaces the provider universe.
    pub file: Option<PathBuf>,
    /// Process only the first N instruments; 0 means all.
    pub limit: usize,
}

/// Complete tracker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub storage: StorageConfig,
    pub limits: LimitRules,
    pub ingest: IngestConfig,
    pub rate_limit: RateLimitConfig,
    pub provider: ProviderConfig,
    pub universe: UniverseConfig,
}

impl TrackerConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("ingest.batch_size must be > 0".into()));
        }
        let chunk = self.storage.write_chunk_size;
        if chunk == 0 || chunk > MAX_WRITE_CHUNK {
            return Err(ConfigError::Invalid(format!(
                "storage.write_chunk_size must be in 1..={MAX_WRITE_CHUNK}, got {chunk}"
            )));
        }

        let attempts = self.provider.max_attempts;
        if attempts == 0 || attempts > MAX_PROVIDER_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "provider.max_attempts must be in 1..={MAX_PROVIDER_ATTEMPTS}, got {attempts}"
            )));
        }

        let l = &self.limits;
        for (name, ratio) in [
            ("main", l.main),
            ("growth", l.growth),
            ("tech", l.tech),
            ("regional", l.regional),
            ("special_treatment", l.special_treatment),
        ] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "limits.{name} must be in (0, 1), got {ratio}"
                )));
            }
        }
        if !(0.0..0.05).contains(&l.tolerance) {
            return Err(ConfigError::Invalid(format!(
                "limits.tolerance must be in [0, 0.05), got {}",
                l.tolerance
            )));
        }
        Ok(())
    }

    /// Universe limit as an `Option`, with 0 meaning unlimited.
    pub fn universe_limit(&self) -> Option<usize> {
        (self.universe.limit > 0).then_some(self.universe.limit)
    }
}
