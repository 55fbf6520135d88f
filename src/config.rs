//! Engine configuration.
//!
//! A single [`EngineConfig`] is built once at process start (from defaults,
//! optionally overlaid by a TOML file) and then shared by `Arc` with every
//! component that needs it. There is no process-wide global.
//!
//! # Example
//!
//! ```no_run
//! use mediaflow_core::EngineConfig;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), mediaflow_core::ConfigError> {
//! let config = EngineConfig::load(Some(Path::new("mediaflow.toml")))?;
//! assert!(config.concurrency >= 1);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::{OutputFormat, VideoQuality};

/// Default free-space floor in megabytes.
pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 500;

/// Default number of jobs processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Upper bound accepted for `concurrency`.
pub const MAX_CONCURRENCY: usize = 16;

/// Default retention window for terminal jobs, in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error(
        "cannot read config file {}: {source}\n  Suggestion: Check the path and file permissions",
        .path.display()
    )]
    Read {
        /// File that failed to load
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error(
        "cannot parse config file {}: {message}\n  Suggestion: Compare the file against the documented keys",
        .path.display()
    )]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for '{key}': {reason}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Paths to the external tools that back downloads, conversion and probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub yt_dlp: PathBuf,
    pub aria2c: PathBuf,
    /// Usenet client invoked with the container file path as its last argument.
    pub usenet_client: PathBuf,
    /// Extra arguments passed to the usenet client before the container path.
    pub usenet_args: Vec<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            yt_dlp: PathBuf::from("yt-dlp"),
            aria2c: PathBuf::from("aria2c"),
            usenet_client: PathBuf::from("nzbget"),
            usenet_args: Vec::new(),
        }
    }
}

/// Public index endpoints used by the search fallback chain.
///
/// Templates contain a `{query}` placeholder that receives the URL-encoded
/// search term. An unset template disables that step of the chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub peer_to_peer_index: Option<String>,
    pub direct_index: Option<String>,
}

/// Outbound notification endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// JSON webhook receiving every engine event.
    pub webhook_url: Option<String>,
    /// Workflow automation webhook receiving job status changes.
    pub automation_url: Option<String>,
}

/// Configuration consumed by the engine, scheduler, resolver, gate and governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub download_dir: PathBuf,
    pub complete_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub database_path: PathBuf,
    pub min_free_space_mb: u64,
    pub default_output_format: OutputFormat,
    pub default_quality: VideoQuality,
    pub concurrency: usize,
    pub retention_days: u32,
    pub poll_interval_secs: u64,
    pub throttle_backoff_secs: u64,
    pub cpu_threshold_percent: f32,
    pub memory_threshold_percent: f32,
    pub load_factor_threshold: f64,
    pub io_ceiling_mb_per_sec: u64,
    pub download_timeout_secs: u64,
    pub conversion_timeout_secs: u64,
    pub auto_clean_temp: bool,
    pub tools: ToolPaths,
    pub search: SearchConfig,
    pub notifications: NotificationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("data/downloads"),
            complete_dir: PathBuf::from("data/complete"),
            temp_dir: PathBuf::from("data/tmp"),
            database_path: PathBuf::from("data/mediaflow.db"),
            min_free_space_mb: DEFAULT_MIN_FREE_SPACE_MB,
            default_output_format: OutputFormat::Mp4,
            default_quality: VideoQuality::High,
            concurrency: DEFAULT_CONCURRENCY,
            retention_days: DEFAULT_RETENTION_DAYS,
            poll_interval_secs: 5,
            throttle_backoff_secs: 30,
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 90.0,
            load_factor_threshold: 1.5,
            io_ceiling_mb_per_sec: 500,
            download_timeout_secs: 3600,
            conversion_timeout_secs: 7200,
            auto_clean_temp: true,
            tools: ToolPaths::default(),
            search: SearchConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `path`, falling back to defaults when no path
    /// is given or the file does not exist. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or holds an
    /// out-of-range value.
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&content).map_err(|error| match error {
                    ConfigError::Parse { message, .. } => ConfigError::Parse {
                        path: path.to_path_buf(),
                        message,
                    },
                    other => other,
                })?
            }
            Some(path) => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|error| ConfigError::Parse {
            path: PathBuf::new(),
            message: error.message().to_string(),
        })
    }

    /// Checks every numeric knob against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::invalid(
                "concurrency",
                format!("must be between 1 and {MAX_CONCURRENCY}, got {}", self.concurrency),
            ));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::invalid("retention_days", "must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be at least 1"));
        }
        for (key, value) in [
            ("cpu_threshold_percent", self.cpu_threshold_percent),
            ("memory_threshold_percent", self.memory_threshold_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigError::invalid(key, format!("must be in (0, 100], got {value}")));
            }
        }
        if self.load_factor_threshold <= 0.0 {
            return Err(ConfigError::invalid("load_factor_threshold", "must be positive"));
        }
        if self.download_timeout_secs == 0 || self.conversion_timeout_secs == 0 {
            return Err(ConfigError::invalid("timeouts", "backend timeouts must be at least 1 second"));
        }
        Ok(())
    }

    /// Free-space floor in bytes.
    #[must_use]
    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(1024 * 1024)
    }

    /// Creates the download, complete and temp directories if missing.
    ///
    /// # Errors
    ///
    /// Returns the first IO error encountered.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [&self.download_dir, &self.complete_dir, &self.temp_dir] {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Re-roots every directory under `root`. Used by tests and the CLI
    /// `--data-dir` flag.
    #[must_use]
    pub fn rooted_at(mut self, root: &Path) -> Self {
        self.download_dir = root.join("downloads");
        self.complete_dir = root.join("complete");
        self.temp_dir = root.join("tmp");
        self.database_path = root.join("mediaflow.db");
        self
    }
}
