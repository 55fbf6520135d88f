//! Host sampling behind a trait so admission decisions can be tested.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};

use super::SystemLoad;

/// Source of raw resource readings.
pub trait SystemProbe: Send + Sync {
    /// `(total_bytes, free_bytes)` of the filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns the IO error raised by the platform query.
    fn disk_space(&self, path: &Path) -> io::Result<(u64, u64)>;

    /// CPU, memory, I/O and load-factor sample.
    fn sample_load(&self) -> SystemLoad;
}

struct Sampler {
    system: System,
    last_io_sample: Option<Instant>,
}

/// Probe reading the real host through `sysinfo` and `fs2`.
///
/// CPU and I/O figures are deltas since the previous sample, so the first
/// reading after construction reports them as zero.
pub struct HostProbe {
    sampler: Mutex<Sampler>,
}

impl HostProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sampler: Mutex::new(Sampler {
                system: System::new_with_specifics(
                    RefreshKind::nothing()
                        .with_cpu(CpuRefreshKind::everything())
                        .with_memory(MemoryRefreshKind::everything()),
                ),
                last_io_sample: None,
            }),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn disk_space(&self, path: &Path) -> io::Result<(u64, u64)> {
        let total = fs2::total_space(path)?;
        let free = fs2::available_space(path)?;
        Ok((total, free))
    }

    fn sample_load(&self) -> SystemLoad {
        let mut sampler = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        let Sampler {
            system,
            last_io_sample,
        } = &mut *sampler;

        system.refresh_cpu_all();
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_disk_usage(),
        );

        let cpu_percent = system.global_cpu_usage();
        let total_mem = system.total_memory();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let memory_percent = if total_mem > 0 {
            (system.used_memory() as f64 / total_mem as f64 * 100.0) as f32
        } else {
            0.0
        };

        let moved: u64 = system
            .processes()
            .values()
            .map(|process| {
                let usage = process.disk_usage();
                usage.read_bytes.saturating_add(usage.written_bytes)
            })
            .sum();
        let now = Instant::now();
        #[allow(clippy::cast_precision_loss)]
        let io_mb_per_sec = match last_io_sample.replace(now) {
            Some(previous) => {
                let elapsed = now.duration_since(previous).as_secs_f64();
                if elapsed > 0.0 {
                    moved as f64 / (1024.0 * 1024.0) / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let cores = system.cpus().len().max(1);
        #[allow(clippy::cast_precision_loss)]
        let load_factor = System::load_average().one / cores as f64;

        SystemLoad {
            cpu_percent,
            memory_percent,
            io_mb_per_sec,
            load_factor,
        }
    }
}

/// Probe returning fixed readings, for tests and dry runs. Free space can
/// be changed while the probe is shared.
#[derive(Debug)]
pub struct FixedProbe {
    total_bytes: Option<u64>,
    free_bytes: AtomicU64,
    load: SystemLoad,
}

impl FixedProbe {
    #[must_use]
    pub fn new(total_bytes: u64, free_bytes: u64, load: SystemLoad) -> Self {
        Self {
            total_bytes: Some(total_bytes),
            free_bytes: AtomicU64::new(free_bytes),
            load,
        }
    }

    /// Probe whose disk query always fails.
    #[must_use]
    pub fn unavailable(load: SystemLoad) -> Self {
        Self {
            total_bytes: None,
            free_bytes: AtomicU64::new(0),
            load,
        }
    }

    /// Changes the free space reported from now on.
    pub fn set_free_bytes(&self, free_bytes: u64) {
        self.free_bytes.store(free_bytes, Ordering::SeqCst);
    }
}

impl SystemProbe for FixedProbe {
    fn disk_space(&self, _path: &Path) -> io::Result<(u64, u64)> {
        let total = self
            .total_bytes
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "disk query unavailable"))?;
        Ok((total, self.free_bytes.load(Ordering::SeqCst)))
    }

    fn sample_load(&self) -> SystemLoad {
        self.load
    }
}
