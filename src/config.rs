/*!
 * Configuration types for Periscope
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PeriscopeError, Result};
use crate::types::MatchMode;

/// Main configuration for a client instance.
///
/// Everything here is passed down as plain parameters; the core never
/// reads global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Cache entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Filter evaluation mode for two-phase queries
    #[serde(default)]
    pub match_mode: MatchMode,

    /// Traverse container hierarchies recursively by default
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Drop server-rejected property paths and retry instead of failing
    /// the whole query. Off by default: silently dropping a path can mask
    /// a real mistake in the caller's request.
    #[serde(default)]
    pub tolerate_invalid_paths: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            cache_ttl_secs: default_cache_ttl(),
            match_mode: MatchMode::All,
            recursive: true,
            tolerate_invalid_paths: false,
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PeriscopeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: ClientConfig = toml::from_str(&contents).map_err(|e| {
            PeriscopeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            return Err(PeriscopeError::Config(
                "cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
