//! The job engine: front-end boundary, scheduler and pipeline workers.
//!
//! # Overview
//!
//! - [`Engine`] - inbound operations (`submit`, `get_job`, `cancel`,
//!   `list_active`, `history`, `disk_space_info`, `stats`, ...)
//! - [`Scheduler`] - admission loop that polls for pending jobs
//! - [`SubmitRequest`] - typed request, validated once into
//!   [`ConversionOptions`](crate::model::ConversionOptions)
//! - [`EngineError`] / [`ClientError`] - error taxonomy and its
//!   caller-facing form
//!
//! The store is authoritative for every job. Workers hold a per-job lock
//! for the length of their run; the registry of running workers is only a
//! liveness cache.
//!
//! # Example
//!
//! ```no_run
//! use mediaflow_core::engine::{Engine, SubmitRequest};
//! use mediaflow_core::EngineConfig;
//!
//! # async fn example() -> Result<(), mediaflow_core::engine::EngineError> {
//! let engine = Engine::open(EngineConfig::default()).await?;
//! let job = engine.submit(SubmitRequest::new("Show Name S01E02")).await?;
//!
//! let scheduler = engine.scheduler();
//! scheduler.tick().await?;
//! scheduler.wait_idle().await;
//! println!("{}", engine.get_job(&job.id).await?.job.status());
//! # Ok(())
//! # }
//! ```

mod error;
mod pipeline;
mod report;
mod request;
mod scheduler;

pub use error::{ClientError, EngineError, ErrorCategory};
pub use report::{
    CancelOutcome, CleanupReport, DirectoryReport, DiskReport, EngineStats, JobDetails,
    MAX_PAGE_SIZE, Page, clamp_page,
};
pub use request::{AcceptedRequest, SubmitRequest};
pub use scheduler::{Admission, INTERRUPTED_MESSAGE, Scheduler};

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backends, Converter, MetadataExtractor, Organizer, build_http_client};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::governor::ResourceGovernor;
use crate::model::{ContentKind, ConversionJob, JobStatus, Media, OutputFormat, ProviderKind};
use crate::notify::Notifier;
use crate::resolver::content::infer_content_kind;
use crate::resolver::{SearchProvider, SourceResolver};
use crate::security::SecurityGate;
use crate::store::{Entity, Repository, Store};
use report::limit_offset;
use scheduler::{JobLocks, WorkerRegistry};

/// Characters stripped from search keywords.
const KEYWORD_STRIP: [char; 5] = [';', '\'', '"', '<', '>'];

const SECS_PER_DAY: u64 = 86_400;

/// Everything the engine, scheduler and workers share.
pub(crate) struct EngineContext {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) gate: SecurityGate,
    pub(crate) governor: ResourceGovernor,
    pub(crate) resolver: SourceResolver,
    pub(crate) converter: Arc<dyn Converter>,
    pub(crate) organizer: Arc<dyn Organizer>,
    pub(crate) extractor: Arc<dyn MetadataExtractor>,
    pub(crate) notifier: Notifier,
    pub(crate) workers: WorkerRegistry,
    pub(crate) locks: JobLocks,
}

impl EngineContext {
    /// Appends a line to a job's log. Failures are logged, not returned.
    pub(crate) async fn log(&self, job_id: &str, line: &str) {
        if let Err(e) = self.repo.append_log(job_id, line).await {
            warn!(job_id = %job_id, error = %e, "cannot append job log");
        }
    }
}

/// Builds an [`Engine`], defaulting every collaborator from the config.
pub struct EngineBuilder {
    config: EngineConfig,
    repo: Arc<dyn Repository>,
    gate: Option<SecurityGate>,
    governor: Option<ResourceGovernor>,
    backends: Option<Backends>,
    search: Option<Vec<Arc<dyn SearchProvider>>>,
    notifier: Option<Notifier>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig, repo: Arc<dyn Repository>) -> Self {
        Self {
            config,
            repo,
            gate: None,
            governor: None,
            backends: None,
            search: None,
            notifier: None,
        }
    }

    #[must_use]
    pub fn gate(mut self, gate: SecurityGate) -> Self {
        self.gate = Some(gate);
        self
    }

    #[must_use]
    pub fn governor(mut self, governor: ResourceGovernor) -> Self {
        self.governor = Some(governor);
        self
    }

    #[must_use]
    pub fn backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Search chain, tried in order for search terms and container files.
    #[must_use]
    pub fn search_chain(mut self, chain: Vec<Arc<dyn SearchProvider>>) -> Self {
        self.search = Some(chain);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// # Errors
    ///
    /// - [`EngineError::Validation`] when the configuration is invalid
    /// - [`EngineError::Backend`] when default backends cannot be built
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config
            .validate()
            .map_err(|e| EngineError::validation(e.to_string()))?;
        let client = build_http_client().map_err(|e| EngineError::Backend(e.to_string()))?;

        let config = Arc::new(self.config);
        let gate = self.gate.unwrap_or_default();
        let governor = self
            .governor
            .unwrap_or_else(|| ResourceGovernor::from_config(&config));
        let backends = match self.backends {
            Some(backends) => backends,
            None => Backends::from_config(&config)?,
        };
        let resolver = match self.search {
            Some(chain) => SourceResolver::new(gate.clone(), backends.downloaders.clone(), chain),
            None => SourceResolver::from_config(
                &config,
                gate.clone(),
                backends.downloaders.clone(),
                &client,
            ),
        };
        let notifier = self
            .notifier
            .unwrap_or_else(|| Notifier::from_config(&config.notifications, &client));

        debug!(resolver = ?resolver, notifier = ?notifier, "engine assembled");
        Ok(Engine {
            ctx: Arc::new(EngineContext {
                config,
                repo: self.repo,
                gate,
                governor,
                resolver,
                converter: backends.converter,
                organizer: backends.organizer,
                extractor: backends.extractor,
                notifier,
                workers: WorkerRegistry::default(),
                locks: JobLocks::default(),
            }),
        })
    }
}

/// Front-end boundary of the job engine.
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<EngineContext>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.ctx.config)
            .field("resolver", &self.ctx.resolver)
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn builder(config: EngineConfig, repo: Arc<dyn Repository>) -> EngineBuilder {
        EngineBuilder::new(config, repo)
    }

    /// Creates the configured directories, opens the SQLite store and
    /// builds an engine with tool-backed defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if directories or the database
    /// cannot be created, or any [`EngineBuilder::build`] error.
    #[instrument(skip(config), fields(db = %config.database_path.display()))]
    pub async fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config
            .ensure_directories()
            .map_err(|e| EngineError::internal(format!("cannot create data directories: {e}")))?;
        let db = Database::new(&config.database_path)
            .await
            .map_err(|e| EngineError::internal(e.to_string()))?;
        Self::builder(config, Arc::new(Store::new(db))).build()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Scheduler sharing this engine's store, backends and registry.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.ctx))
    }

    // ==================== Jobs ====================

    /// Validates `request` and persists a pending job with its media.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] / [`EngineError::Security`] when the
    ///   request is refused; nothing is persisted
    /// - [`EngineError::Store`] if the job cannot be saved
    #[instrument(skip(self, request), fields(source = %request.source))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<ConversionJob, EngineError> {
        let accepted = request.validate(&self.ctx.config, &self.ctx.gate)?;
        let content_kind = accepted.options.content_kind.unwrap_or_else(|| {
            match accepted.source_kind {
                ProviderKind::Search => infer_content_kind(&accepted.source, ""),
                _ => infer_content_kind("", &accepted.source),
            }
        });

        let media = Media::new(accepted.source, accepted.source_kind, content_kind);
        let job = ConversionJob::new(media.id.clone(), accepted.options);
        self.ctx.repo.save_pair(&job, &media).await?;
        self.ctx
            .log(&job.id, &format!("submitted as {} ({})", media.source_kind, media.content_kind))
            .await;
        info!(job_id = %job.id, kind = %media.source_kind, "job submitted");
        Ok(job)
    }

    /// A job and its media.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn get_job(&self, id: &str) -> Result<JobDetails, EngineError> {
        let job = self.load_job(id).await?;
        let media = self.ctx.repo.get_media(&job.media_id).await?;
        Ok(JobDetails { job, media })
    }

    /// Cancels a job. A pending job is cancelled at once; a running job is
    /// signalled and stops at its next phase checkpoint.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] for an unknown id
    /// - [`EngineError::Validation`] when the job already finished
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, EngineError> {
        let job = self.load_job(id).await?;
        if job.status().is_terminal() {
            return Err(EngineError::validation(format!(
                "job {id} is already {}",
                job.status()
            )));
        }
        if let Some(outcome) = self.signal_worker(id).await {
            return Ok(outcome);
        }

        let Some(guard) = self.ctx.locks.try_lock(id) else {
            // A worker took the job between the two checks.
            return self.signal_worker(id).await.ok_or_else(|| {
                EngineError::validation(format!("job {id} is busy, try again"))
            });
        };
        let result = self.cancel_idle(id).await;
        drop(guard);
        self.ctx.locks.release(id);
        result
    }

    async fn signal_worker(&self, id: &str) -> Option<CancelOutcome> {
        let media_id = self.ctx.workers.signal_cancel(id).await?;
        let download = self.ctx.resolver.cancel(&media_id);
        let conversion = self.ctx.converter.cancel(&media_id);
        info!(job_id = %id, download, conversion, "cancel signalled to running worker");
        self.ctx.log(id, "cancel requested").await;
        Some(CancelOutcome::Signalled)
    }

    async fn cancel_idle(&self, id: &str) -> Result<CancelOutcome, EngineError> {
        let mut job = self.load_job(id).await?;
        let from = job.status();
        job.cancel().map_err(|e| EngineError::validation(e.to_string()))?;
        match self.ctx.repo.get_media(&job.media_id).await? {
            Some(mut media) => {
                if let Err(e) = media.transition(JobStatus::Cancelled) {
                    debug!(error = %e, "media already terminal");
                }
                self.ctx.repo.save_pair(&job, &media).await?;
            }
            None => self.ctx.repo.save_job(&job).await?,
        }
        self.ctx.log(id, &format!("{from} -> cancelled")).await;
        self.ctx.notifier.status_changed(&job);
        info!(job_id = %id, "job cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Starts a new pending job for a failed or cancelled one, on a fresh
    /// copy of its media. The old job stays as history.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] for an unknown job or missing media
    /// - [`EngineError::Validation`] unless the job failed or was cancelled
    #[instrument(skip(self))]
    pub async fn retry(&self, id: &str) -> Result<ConversionJob, EngineError> {
        let previous = self.load_job(id).await?;
        if !matches!(previous.status(), JobStatus::Failed | JobStatus::Cancelled) {
            return Err(EngineError::validation(format!(
                "only failed or cancelled jobs can be retried, job {id} is {}",
                previous.status()
            )));
        }
        let media = self
            .ctx
            .repo
            .get_media(&previous.media_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Media, &previous.media_id))?;

        let media = media.fresh_copy();
        let job = ConversionJob::new(media.id.clone(), previous.options.clone());
        self.ctx.repo.save_pair(&job, &media).await?;
        self.ctx.log(&job.id, &format!("retry of job {id}")).await;
        info!(job_id = %job.id, previous = %id, "job retried");
        Ok(job)
    }

    /// Every job that has not reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on database failure.
    pub async fn list_active(&self) -> Result<Vec<ConversionJob>, EngineError> {
        Ok(self.ctx.repo.active_jobs().await?)
    }

    /// All jobs, newest first. `page` starts at 1; `size` is capped at
    /// [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on database failure.
    pub async fn history(&self, page: u32, size: u32) -> Result<Page<ConversionJob>, EngineError> {
        let (page, size) = clamp_page(page, size);
        let (limit, offset) = limit_offset(page, size);
        let items = self.ctx.repo.list_jobs(limit, offset).await?;
        Ok(Page { page, size, items })
    }

    /// A job's progress log in append order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn job_logs(&self, id: &str) -> Result<Vec<String>, EngineError> {
        self.load_job(id).await?;
        Ok(self.ctx.repo.job_logs(id).await?)
    }

    /// Media whose source or metadata matches `keyword`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when nothing is left of the
    /// keyword after stripping quote and markup characters.
    pub async fn search_media(
        &self,
        keyword: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<Media>, EngineError> {
        let keyword: String = keyword.chars().filter(|c| !KEYWORD_STRIP.contains(c)).collect();
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(EngineError::validation("search keyword is empty"));
        }
        let (page, size) = clamp_page(page, size);
        let (limit, offset) = limit_offset(page, size);
        let items = self.ctx.repo.search_media(keyword, limit, offset).await?;
        Ok(Page { page, size, items })
    }

    /// Output formats the converter offers for a content kind.
    #[must_use]
    pub fn available_formats(&self, kind: ContentKind) -> Vec<OutputFormat> {
        self.ctx.converter.available_formats(kind)
    }

    // ==================== System ====================

    /// Space on the download, complete and temp directories plus the
    /// current system load.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if sampling panics.
    pub async fn disk_space_info(&self) -> Result<DiskReport, EngineError> {
        let governor = self.ctx.governor.clone();
        let config = Arc::clone(&self.ctx.config);
        tokio::task::spawn_blocking(move || {
            let directories: Vec<DirectoryReport> = [
                ("download", &config.download_dir),
                ("complete", &config.complete_dir),
                ("temp", &config.temp_dir),
            ]
            .into_iter()
            .map(|(name, path)| DirectoryReport {
                name,
                path: path.clone(),
                stats: governor.disk_stats(path),
            })
            .collect();
            let warnings = directories
                .iter()
                .filter_map(|dir| match &dir.stats {
                    Some(stats) if stats.is_low() => Some(format!(
                        "{} directory has {} MB free, below the {} MB floor",
                        dir.name,
                        stats.free_bytes / (1024 * 1024),
                        stats.min_free_bytes / (1024 * 1024)
                    )),
                    Some(_) => None,
                    None => Some(format!("{} directory space is unavailable", dir.name)),
                })
                .collect();
            DiskReport {
                directories,
                load: governor.system_load(),
                warnings,
            }
        })
        .await
        .map_err(|e| EngineError::internal(format!("disk sampling panicked: {e}")))
    }

    /// Job and media counts plus the current system load.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on database failure.
    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let repo = &self.ctx.repo;
        let since = Utc::now() - chrono::Duration::hours(24);
        let jobs_by_status = repo
            .count_jobs_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.as_str(), count))
            .collect();
        let media_by_kind = repo
            .count_media_by_kind()
            .await?
            .into_iter()
            .map(|(kind, count)| (kind.as_str(), count))
            .collect();

        let governor = self.ctx.governor.clone();
        let load = tokio::task::spawn_blocking(move || governor.system_load())
            .await
            .map_err(|e| EngineError::internal(format!("load sampling panicked: {e}")))?;

        Ok(EngineStats {
            total_jobs: repo.count_jobs().await?,
            jobs_by_status,
            media_by_kind,
            completed_last_24h: repo.count_jobs_finished_since(JobStatus::Completed, since).await?,
            failed_last_24h: repo.count_jobs_finished_since(JobStatus::Failed, since).await?,
            active_workers: self.ctx.workers.len().await,
            load,
        })
    }

    /// Removes terminal jobs, then orphaned media, older than `days`
    /// (the configured retention when `None`), and stale temp files when
    /// `auto_clean_temp` is set.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] when `days` is 0
    /// - [`EngineError::Store`] on database failure
    #[instrument(skip(self))]
    pub async fn cleanup(&self, days: Option<u32>) -> Result<CleanupReport, EngineError> {
        let days = days.unwrap_or(self.ctx.config.retention_days);
        if days == 0 {
            return Err(EngineError::validation("retention must be at least one day"));
        }
        let jobs_removed = self.ctx.repo.delete_jobs_older_than(days).await?;
        let media_removed = self.ctx.repo.delete_media_older_than(days).await?;
        let temp_files_removed = if self.ctx.config.auto_clean_temp {
            self.clean_temp(days).await
        } else {
            0
        };
        let report = CleanupReport {
            retention_days: days,
            jobs_removed,
            media_removed,
            temp_files_removed,
        };
        info!(?report, "cleanup finished");
        Ok(report)
    }

    /// Deletes entries of the temp directory not modified for `days`.
    /// Directories of running jobs are skipped.
    async fn clean_temp(&self, days: u32) -> u64 {
        let root = &self.ctx.config.temp_dir;
        let Some(cutoff) =
            SystemTime::now().checked_sub(Duration::from_secs(u64::from(days) * SECS_PER_DAY))
        else {
            return 0;
        };
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %root.display(), error = %e, "temp directory not readable");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "cannot list temp directory");
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.ctx.workers.contains(&name).await {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let stale = metadata.modified().is_ok_and(|modified| modified < cutoff);
            if !stale {
                continue;
            }
            if remove_temp_entry(&self.ctx.gate, &entry.path(), root, metadata.is_dir()).await {
                removed += 1;
            }
        }
        removed
    }

    async fn load_job(&self, id: &str) -> Result<ConversionJob, EngineError> {
        self.ctx
            .repo
            .get_job(id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Job, id))
    }
}

async fn remove_temp_entry(gate: &SecurityGate, path: &Path, root: &Path, is_dir: bool) -> bool {
    let path = match gate.validate_path(path, Some(root)) {
        Ok(path) => path,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "refusing to remove temp entry");
            return false;
        }
    };
    let result = if is_dir {
        tokio::fs::remove_dir_all(&path).await
    } else {
        tokio::fs::remove_file(&path).await
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale temp entry");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot remove temp entry");
            false
        }
    }
}
