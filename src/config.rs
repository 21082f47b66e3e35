//! Coordinator configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`.hivework.toml`)
//! 2. Environment variables (with `HIVEWORK_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [coordinator]
//! timeout_ms = 10000
//! availability_poll_interval_ms = 100
//! termination_poll_interval_ms = 250
//! audit_enabled = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};

/// Default config file looked up by [`CoordinatorConfig::load`].
pub const CONFIG_FILE: &str = ".hivework.toml";

/// Timing and audit settings shared by every coordinator operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Default deadline for waits and termination, in milliseconds.
    pub timeout_ms: u64,

    /// Cadence of `next_available` re-queries, in milliseconds.
    pub availability_poll_interval_ms: u64,

    /// Cadence of termination confirmation polls, in milliseconds.
    pub termination_poll_interval_ms: u64,

    /// When false, audit entries are dropped unless a sink is set explicitly.
    pub audit_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            availability_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            termination_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            audit_enabled: true,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `.hivework.toml` in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content (the `[coordinator]` table).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            coordinator: CoordinatorConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(full.coordinator)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("HIVEWORK_TIMEOUT_MS") {
            self.timeout_ms = v;
        }
        if let Some(v) = env_parse("HIVEWORK_AVAILABILITY_POLL_INTERVAL_MS") {
            self.availability_poll_interval_ms = v;
        }
        if let Some(v) = env_parse("HIVEWORK_TERMINATION_POLL_INTERVAL_MS") {
            self.termination_poll_interval_ms = v;
        }
        if let Some(v) = env_parse("HIVEWORK_AUDIT_ENABLED") {
            self.audit_enabled = v;
        }
    }

    /// Sets the default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets both poll intervals.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.availability_poll_interval_ms = duration_ms(interval);
        self.termination_poll_interval_ms = duration_ms(interval);
        self
    }

    /// Default deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Finder wait cadence as a [`Duration`]. Never zero.
    pub fn availability_poll_interval(&self) -> Duration {
        Duration::from_millis(self.availability_poll_interval_ms.max(1))
    }

    /// Termination poll cadence as a [`Duration`]. Never zero.
    pub fn termination_poll_interval(&self) -> Duration {
        Duration::from_millis(self.termination_poll_interval_ms.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path that failed.
        path: String,
        /// Error description.
        error: String,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
}
