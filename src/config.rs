//! Driver configuration, loadable from TOML.

use crate::base::{Error, Result, DEFAULT_POLL_INTERVAL};
use crate::internals::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of one [`crate::UrgDevice`].
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```toml
/// max_retry_times = 8
/// captures_size = 1
///
/// [timeouts]
/// first_line_ms = 1000
///
/// [monitor]
/// mode = "record"
/// path = "urg.log"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UrgConfig {
    /// Consecutive bad frames a continuous capture tolerates.
    #[serde(default = "default_max_retry_times")]
    pub max_retry_times: usize,

    /// Number of scans buffered for [`crate::UrgDevice::capture`].
    #[serde(default = "default_captures_size")]
    pub captures_size: usize,

    /// Read timeout of the underlying serial port or socket in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub monitor: MonitorMode,
}

/// Protocol timeouts in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Wait for the first line of a reply.
    #[serde(default = "default_first_line_ms")]
    pub first_line_ms: u64,

    /// Wait for each further line of a reply.
    #[serde(default = "default_continuation_ms")]
    pub continuation_ms: u64,

    /// Bound for draining stray data.
    #[serde(default = "default_total_ms")]
    pub total_ms: u64,
}

impl TimeoutConfig {
    pub fn first_line(&self) -> Duration {
        Duration::from_millis(self.first_line_ms)
    }

    pub fn continuation(&self) -> Duration {
        Duration::from_millis(self.continuation_ms)
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }
}

/// Record/replay of the connection traffic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum MonitorMode {
    /// Talk to the device without logging.
    #[default]
    Direct,
    /// Talk to the device and log every call to the given file.
    Record(PathBuf),
    /// Answer every call from a log written in `Record` mode.
    Play(PathBuf),
}

fn default_max_retry_times() -> usize {
    URG_DEFAULT_RETRY_TIMES
}
fn default_captures_size() -> usize {
    1
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}
fn default_first_line_ms() -> u64 {
    SCIP_FIRST_LINE_TIMEOUT.as_millis() as u64
}
fn default_continuation_ms() -> u64 {
    SCIP_CONTINUATION_TIMEOUT.as_millis() as u64
}
fn default_total_ms() -> u64 {
    SCIP_TOTAL_TIMEOUT.as_millis() as u64
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            first_line_ms: default_first_line_ms(),
            continuation_ms: default_continuation_ms(),
            total_ms: default_total_ms(),
        }
    }
}

impl Default for UrgConfig {
    fn default() -> Self {
        Self {
            max_retry_times: default_max_retry_times(),
            captures_size: default_captures_size(),
            poll_interval_ms: default_poll_interval_ms(),
            timeouts: TimeoutConfig::default(),
            monitor: MonitorMode::Direct,
        }
    }
}

impl UrgConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> Result<UrgConfig> {
        let config: UrgConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<UrgConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        UrgConfig::from_toml_str(&content)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.captures_size == 0 {
            return Err(Error::Config(String::from("captures_size must be at least 1")));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(String::from("poll_interval_ms must be at least 1")));
        }
        Ok(())
    }
}
