//! Configuration types for credgate
//!
//! The configuration file is TOML. Every section and field is optional;
//! missing values fall back to the defaults below.
//!
//! ```toml
//! [provider]
//! kind = "file"
//! credentials_file = "/etc/credgate/users.json"
//! lookup_timeout_ms = 2000
//! lookup_cache_ttl_secs = 0
//!
//! [cache]
//! max_entries = 10000
//! ttl_secs = 3600
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Credential provider selection
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Derived-secret cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the default configuration. A file that exists
    /// but cannot be read or parsed is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.provider.kind == ProviderKind::File && self.provider.credentials_file.is_none() {
            return Err(ConfigError::Invalid(
                "provider.kind = \"file\" requires provider.credentials_file".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which backing store serves credential lookups
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Process-local map, populated by bootstrap code
    #[default]
    Memory,
    /// JSON credentials file, reloadable at runtime
    File,
}

/// Credential provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Path to the credentials file (required for `kind = "file"`)
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Deadline applied to a single lookup
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// TTL of the lookup cache in front of the provider (0 disables it)
    #[serde(default)]
    pub lookup_cache_ttl_secs: u64,
}

impl ProviderConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn lookup_cache_ttl(&self) -> Option<Duration> {
        (self.lookup_cache_ttl_secs > 0).then(|| Duration::from_secs(self.lookup_cache_ttl_secs))
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            credentials_file: None,
            lookup_timeout_ms: default_lookup_timeout_ms(),
            lookup_cache_ttl_secs: 0,
        }
    }
}

/// Derived-secret cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached (user, host) entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entry lifetime; 0 keeps entries until invalidated or evicted
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
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

fn default_lookup_timeout_ms() -> u64 {
    2000
}

fn default_max_entries() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}
