//! Read models returned by the front-end boundary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::governor::{DiskStats, SystemLoad};
use crate::model::{ConversionJob, Media};

/// Largest page size accepted by listing operations.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A job together with the media it works on.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    pub job: ConversionJob,
    /// `None` when the media row was already cleaned up.
    pub media: Option<Media>,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub page: u32,
    pub size: u32,
    pub items: Vec<T>,
}

/// Clamps `page` to at least 1 and `size` to `1..=MAX_PAGE_SIZE`.
#[must_use]
pub fn clamp_page(page: u32, size: u32) -> (u32, u32) {
    (page.max(1), size.clamp(1, MAX_PAGE_SIZE))
}

/// SQL `(limit, offset)` for a clamped page.
#[must_use]
pub(crate) fn limit_offset(page: u32, size: u32) -> (i64, i64) {
    let (page, size) = clamp_page(page, size);
    (i64::from(size), i64::from(page - 1) * i64::from(size))
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job had not started and is now cancelled.
    Cancelled,
    /// A worker is running the job and stops at its next checkpoint.
    Signalled,
}

/// Space on one of the configured directories.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub name: &'static str,
    pub path: PathBuf,
    /// `None` when the filesystem could not be queried.
    pub stats: Option<DiskStats>,
}

/// Result of [`Engine::disk_space_info`](super::Engine::disk_space_info).
#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub directories: Vec<DirectoryReport>,
    pub load: SystemLoad,
    pub warnings: Vec<String>,
}

impl DiskReport {
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Result of [`Engine::stats`](super::Engine::stats).
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_jobs: i64,
    pub jobs_by_status: BTreeMap<&'static str, i64>,
    pub media_by_kind: BTreeMap<&'static str, i64>,
    pub completed_last_24h: i64,
    pub failed_last_24h: i64,
    pub active_workers: usize,
    pub load: SystemLoad,
}

/// Result of [`Engine::cleanup`](super::Engine::cleanup).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub retention_days: u32,
    pub jobs_removed: u64,
    pub media_removed: u64,
    pub temp_files_removed: u64,
}
