//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::{Result, SwError};
use crate::logging::{LogConfig, LogFormat};

/// Worker configuration, typically loaded from JSON next to the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Location of the worker script; relative URLs resolve against it.
    pub location: String,

    /// Cache naming
    pub cache_names: CacheNameDetails,

    /// Network settings for the default fetcher
    pub network: NetworkConfig,

    /// Logging
    pub logging: LogSettings,
}

/// Parts from which cache names are built: `{prefix}-{name}-{suffix}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNameDetails {
    pub prefix: String,

    /// Defaults to the worker location when unset.
    pub suffix: Option<String>,

    pub precache: String,

    pub runtime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string
    pub user_agent: String,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Maximum number of redirects to follow
    pub max_redirects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Base level: trace, debug, info, warn or error
    pub level: String,

    pub format: LogFormat,

    /// Custom filter, e.g. "rustkit_sw=debug"
    pub filter: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            location: "http://localhost/sw.js".to_string(),
            cache_names: CacheNameDetails::default(),
            network: NetworkConfig::default(),
            logging: LogSettings::default(),
        }
    }
}

impl Default for CacheNameDetails {
    fn default() -> Self {
        Self {
            prefix: "rustkit".to_string(),
            suffix: None,
            precache: "precache".to_string(),
            runtime: "runtime".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("RustKit-SW/{}", env!("CARGO_PKG_VERSION")),
            timeout_ms: 30_000,
            max_redirects: 10,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            filter: None,
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// The worker location as a URL.
    pub fn location(&self) -> Result<Url> {
        Ok(Url::parse(&self.location)?)
    }
}

impl LogSettings {
    /// Convert into a subscriber configuration.
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level = self
            .level
            .parse()
            .map_err(|_| SwError::Config(format!("unknown log level: {}", self.level)))?;
        Ok(LogConfig {
            level,
            format: self.format,
            filter: self.filter.clone(),
            ..LogConfig::default()
        })
    }
}
