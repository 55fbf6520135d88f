//! Resource governor for admission control.
//!
//! The governor samples disk space, CPU, memory, load average and disk I/O
//! and turns them into a single throttle decision. It is polled by the
//! scheduler before each admission cycle; nothing is pushed.
//!
//! # Example
//!
//! ```no_run
//! use mediaflow_core::governor::ResourceGovernor;
//! use mediaflow_core::EngineConfig;
//!
//! let config = EngineConfig::default();
//! let governor = ResourceGovernor::from_config(&config);
//! if governor.should_throttle() {
//!     println!("backing off");
//! }
//! ```

mod probe;

pub use probe::{FixedProbe, HostProbe, SystemProbe};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Space figures for the filesystem holding a directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskStats {
    pub path: PathBuf,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub percent_used: f64,
    pub min_free_bytes: u64,
}

impl DiskStats {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, total_bytes: u64, free_bytes: u64, min_free_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(free_bytes);
        #[allow(clippy::cast_precision_loss)]
        let percent_used = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };
        Self {
            path: path.into(),
            total_bytes,
            free_bytes,
            used_bytes,
            percent_used,
            min_free_bytes,
        }
    }

    /// True when free space is below the configured floor.
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.free_bytes < self.min_free_bytes
    }
}

/// One sample of host load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemLoad {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// Combined read and write throughput across processes.
    pub io_mb_per_sec: f64,
    /// One-minute load average divided by logical core count.
    pub load_factor: f64,
}

/// Limits above which new work is not admitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min_free_bytes: u64,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub load_factor: f64,
    pub io_mb_per_sec: f64,
}

impl Thresholds {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let io_mb_per_sec = config.io_ceiling_mb_per_sec as f64;
        Self {
            min_free_bytes: config.min_free_space_mb.saturating_mul(BYTES_PER_MB),
            cpu_percent: config.cpu_threshold_percent,
            memory_percent: config.memory_threshold_percent,
            load_factor: config.load_factor_threshold,
            io_mb_per_sec,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Why the governor refused admission.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleReason {
    LowDisk(DiskStats),
    Cpu(f32),
    Memory(f32),
    LoadFactor(f64),
    DiskIo(f64),
}

impl std::fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowDisk(stats) => write!(
                f,
                "free space on {} is {} MB, below the {} MB floor",
                stats.path.display(),
                stats.free_bytes / BYTES_PER_MB,
                stats.min_free_bytes / BYTES_PER_MB
            ),
            Self::Cpu(value) => write!(f, "CPU usage at {value:.1}%"),
            Self::Memory(value) => write!(f, "memory usage at {value:.1}%"),
            Self::LoadFactor(value) => write!(f, "load factor at {value:.2}"),
            Self::DiskIo(value) => write!(f, "disk I/O at {value:.1} MB/s"),
        }
    }
}

/// Samples host resources and decides whether new jobs may start.
#[derive(Clone)]
pub struct ResourceGovernor {
    probe: Arc<dyn SystemProbe>,
    thresholds: Thresholds,
    default_dir: PathBuf,
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGovernor")
            .field("thresholds", &self.thresholds)
            .field("default_dir", &self.default_dir)
            .finish_non_exhaustive()
    }
}

impl ResourceGovernor {
    #[must_use]
    pub fn new(probe: Arc<dyn SystemProbe>, thresholds: Thresholds, default_dir: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            thresholds,
            default_dir: default_dir.into(),
        }
    }

    /// Governor backed by the real host, checking the download directory.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(HostProbe::new()),
            Thresholds::from_config(config),
            config.download_dir.clone(),
        )
    }

    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Checks free space for `dir` (the download directory when `None`).
    ///
    /// Returns `(true, stats)` when free space meets the floor. When the
    /// filesystem cannot be queried the answer is `(false, None)`.
    #[instrument(skip(self))]
    pub fn has_disk_space(&self, dir: Option<&Path>) -> (bool, Option<DiskStats>) {
        match self.disk_stats(dir.unwrap_or(&self.default_dir)) {
            Some(stats) => (!stats.is_low(), Some(stats)),
            None => (false, None),
        }
    }

    /// Space figures for `dir`, or `None` if the filesystem cannot be queried.
    #[must_use]
    pub fn disk_stats(&self, dir: &Path) -> Option<DiskStats> {
        let existing = nearest_existing(dir);
        match self.probe.disk_space(&existing) {
            Ok((total, free)) => Some(DiskStats::new(dir, total, free, self.thresholds.min_free_bytes)),
            Err(error) => {
                warn!(path = %dir.display(), error = %error, "cannot query disk space");
                None
            }
        }
    }

    /// Current CPU, memory, I/O and load-factor sample.
    #[must_use]
    pub fn system_load(&self) -> SystemLoad {
        self.probe.sample_load()
    }

    /// The first limit currently exceeded, if any.
    #[must_use]
    pub fn throttle_reason(&self) -> Option<ThrottleReason> {
        let (enough, stats) = self.has_disk_space(None);
        if !enough {
            let stats = stats.unwrap_or_else(|| {
                DiskStats::new(&self.default_dir, 0, 0, self.thresholds.min_free_bytes)
            });
            return Some(ThrottleReason::LowDisk(stats));
        }

        let load = self.system_load();
        let limits = &self.thresholds;
        if load.cpu_percent > limits.cpu_percent {
            return Some(ThrottleReason::Cpu(load.cpu_percent));
        }
        if load.memory_percent > limits.memory_percent {
            return Some(ThrottleReason::Memory(load.memory_percent));
        }
        if load.load_factor > limits.load_factor {
            return Some(ThrottleReason::LoadFactor(load.load_factor));
        }
        if load.io_mb_per_sec > limits.io_mb_per_sec {
            return Some(ThrottleReason::DiskIo(load.io_mb_per_sec));
        }
        None
    }

    /// True when new work should not be admitted right now.
    #[must_use]
    pub fn should_throttle(&self) -> bool {
        match self.throttle_reason() {
            Some(reason) => {
                debug!(reason = %reason, "throttling admissions");
                true
            }
            None => false,
        }
    }
}

/// Walks up to the closest ancestor that exists, so space can be queried
/// for directories that have not been created yet.
fn nearest_existing(dir: &Path) -> PathBuf {
    let mut current = dir;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return PathBuf::from("."),
        }
    }
}
