//! Per-job pipeline worker.
//!
//! A worker drives one job through download, processing, conversion and
//! organizing while holding that job's lock. Cancellation is cooperative:
//! the flag is checked before every phase transition, and backends that
//! observe a cancel return early with a cancelled error.

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

use super::{EngineContext, EngineError};
use crate::governor::ThrottleReason;
use crate::model::{ConversionJob, JobStatus, Media, ProviderKind};
use crate::notify::{EventKind, Notification};
use crate::resolver::content::{clean_stem, infer_content_kind, label_from_filename, label_metadata};
use crate::security::{FileCategory, SecurityGate, SecurityRejection};
use crate::store::StoreError;

/// How often progress is copied from the backends into the store.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Why a run stopped early.
#[derive(Debug)]
enum Stop {
    Cancelled,
    Failed(String),
}

impl From<StoreError> for Stop {
    fn from(err: StoreError) -> Self {
        Self::Failed(format!("store error: {err}"))
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Download,
    Convert,
}

/// Mutable state of one run.
struct Run {
    job: ConversionJob,
    media: Media,
    scoped_dir: Option<PathBuf>,
}

pub(crate) struct Worker {
    ctx: Arc<EngineContext>,
    job_id: String,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<EngineContext>, job_id: String, cancel: Arc<AtomicBool>) -> Self {
        Self {
            ctx,
            job_id,
            cancel,
        }
    }

    /// Runs the job to a terminal state, then releases its lock and
    /// registry entry.
    pub(crate) async fn run(self) {
        let guard = self.ctx.locks.lock(&self.job_id).await;
        if let Err(e) = self.execute().await {
            error!(error = %e, "worker could not run job");
            self.ctx.notifier.notify(Notification::new(
                EventKind::SystemError,
                format!("job {}: {e}", self.job_id),
            ));
        }
        self.remove_job_temp().await;
        drop(guard);
        self.ctx.locks.release(&self.job_id);
        self.ctx.workers.remove(&self.job_id).await;
    }

    async fn execute(&self) -> Result<(), StoreError> {
        let Some(job) = self.ctx.repo.get_job(&self.job_id).await? else {
            warn!("job disappeared before it started");
            return Ok(());
        };
        if job.status() != JobStatus::Pending {
            debug!(status = %job.status(), "job no longer pending, skipping");
            return Ok(());
        }
        let Some(media) = self.ctx.repo.get_media(&job.media_id).await? else {
            let mut job = job;
            if job.fail(format!("media {} not found", job.media_id)).is_ok() {
                self.ctx.repo.save_job(&job).await?;
                self.ctx.notifier.status_changed(&job);
            }
            return Ok(());
        };

        let mut run = Run {
            job,
            media,
            scoped_dir: None,
        };
        match self.drive(&mut run).await {
            Ok(()) => info!(output = ?run.media.output_path(), "job completed"),
            Err(Stop::Cancelled) => self.finish(&mut run, None).await,
            Err(Stop::Failed(message)) => self.finish(&mut run, Some(message)).await,
        }
        self.ctx.resolver.forget(&run.media.id);
        self.ctx.converter.forget(&run.media.id);
        Ok(())
    }

    async fn drive(&self, run: &mut Run) -> Result<(), Stop> {
        let input = self.download(run).await?;
        self.process(run, &input).await?;
        let converted = self.convert(run, &input).await?;
        self.organize(run, &converted).await?;
        self.advance(run, JobStatus::Completed).await
    }

    // ==================== Phases ====================

    #[instrument(skip_all)]
    async fn download(&self, run: &mut Run) -> Result<PathBuf, Stop> {
        self.advance(run, JobStatus::Downloading).await?;

        let ctx = &self.ctx;
        let destination = if run.media.source_kind == ProviderKind::LocalFile {
            ctx.config.download_dir.clone()
        } else {
            let scoped = ctx
                .gate
                .create_scoped_directory(&ctx.config.download_dir, &run.media.id)
                .await
                .map_err(|e| Stop::Failed(e.to_string()))?;
            run.scoped_dir = Some(scoped.clone());
            scoped
        };
        self.ensure_disk_space(&destination)?;

        let acquired = self
            .with_progress(
                &run.media,
                Phase::Download,
                ctx.resolver.acquire(&run.media, &destination),
            )
            .await;
        let acquisition = acquired.map_err(|e| {
            for attempt in e.attempts() {
                debug!(attempt = %attempt, "resolution attempt");
            }
            self.stop(e.is_cancelled(), e.to_string())
        })?;
        for attempt in &acquisition.attempts {
            self.ctx.log(&run.job.id, &attempt.to_string()).await;
        }

        let input = acquisition
            .primary()
            .map(Path::to_path_buf)
            .ok_or_else(|| Stop::Failed("download produced no video file".to_string()))?;
        if let Some(term) = &acquisition.search_term {
            run.media
                .metadata
                .custom
                .insert("search_term".to_string(), serde_json::Value::from(term.clone()));
        }
        run.media.downloaded_path = Some(input.clone());
        run.media.set_download_progress(100);
        info!(input = %input.display(), provider = %acquisition.provider, "download finished");
        Ok(input)
    }

    #[instrument(skip_all)]
    async fn process(&self, run: &mut Run, input: &Path) -> Result<(), Stop> {
        self.advance(run, JobStatus::Processing).await?;

        let category = self
            .ctx
            .gate
            .validate_file_identity(input, &[FileCategory::Video, FileCategory::Audio])
            .map_err(|e| Stop::Failed(e.to_string()))?;

        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let term = run
            .media
            .metadata
            .custom
            .get("search_term")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let kind = run
            .job
            .options
            .content_kind
            .unwrap_or_else(|| infer_content_kind(term.as_deref().unwrap_or(""), &file_name));
        let label = term.unwrap_or_else(|| label_from_filename(&file_name));

        run.media.content_kind = kind;
        run.media.metadata.fill_from(label_metadata(&label, kind));
        match self.ctx.extractor.extract(input).await {
            Ok(technical) => run.media.metadata.fill_from(technical),
            Err(e) => {
                warn!(error = %e, "metadata extraction failed, continuing");
                self.ctx
                    .log(&run.job.id, &format!("metadata extraction skipped: {e}"))
                    .await;
            }
        }
        info!(kind = %kind, category = %category, label = %label, "media identified");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn convert(&self, run: &mut Run, input: &Path) -> Result<PathBuf, Stop> {
        self.advance(run, JobStatus::Converting).await?;

        let ctx = &self.ctx;
        let options = run.job.options.clone();
        let dir = ctx.config.temp_dir.join(&run.job.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Stop::Failed(format!("cannot create {}: {e}", dir.display())))?;

        self.ensure_disk_space(&dir)?;

        let output = conversion_output(
            &ctx.gate,
            &ctx.config.temp_dir,
            &dir,
            &clean_stem(&run.media.display_name()),
            options.output_format.extension(),
            input,
        )
        .map_err(|e| Stop::Failed(e.to_string()))?;

        let converted = self
            .with_progress(
                &run.media,
                Phase::Convert,
                ctx.converter.convert(&run.media, &options, &output),
            )
            .await;
        converted.map_err(|e| self.stop(e.is_cancelled(), e.to_string()))?;
        run.media.set_conversion_progress(100);
        info!(output = %output.display(), "conversion finished");
        Ok(output)
    }

    #[instrument(skip_all)]
    async fn organize(&self, run: &mut Run, converted: &Path) -> Result<(), Stop> {
        self.advance(run, JobStatus::Organizing).await?;

        let ctx = &self.ctx;
        let base = run
            .job
            .options
            .output_directory
            .clone()
            .unwrap_or_else(|| ctx.config.complete_dir.clone());
        let final_path = if run.job.options.organize {
            ctx.organizer
                .organize(&run.media, converted, &base)
                .await
                .map_err(|e| Stop::Failed(e.to_string()))?
        } else {
            place_flat(ctx, converted, &base).await?
        };
        run.media
            .record_output(final_path.clone())
            .map_err(|e| Stop::Failed(e.to_string()))?;

        let hash_input = final_path.clone();
        match tokio::task::spawn_blocking(move || sha256_file(&hash_input)).await {
            Ok(Ok(digest)) => {
                let custom = &mut run.media.metadata.custom;
                custom.insert("file_hash".to_string(), serde_json::Value::from(digest));
                custom.insert("hash_algorithm".to_string(), serde_json::Value::from("sha256"));
            }
            Ok(Err(e)) => warn!(path = %final_path.display(), error = %e, "cannot hash output"),
            Err(e) => warn!(error = %e, "hash task panicked"),
        }

        if !run.job.options.keep_original {
            if let Some(dir) = run.scoped_dir.take() {
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(path = %dir.display(), error = %e, "cannot remove download directory");
                }
            }
        }
        info!(path = %final_path.display(), "output organized");
        Ok(())
    }

    // ==================== Transitions ====================

    /// Checks the cancel flag, then moves job and media to `next` and
    /// persists both.
    async fn advance(&self, run: &mut Run, next: JobStatus) -> Result<(), Stop> {
        if !next.is_terminal() && self.cancel.load(Ordering::SeqCst) {
            return Err(Stop::Cancelled);
        }
        let from = run.job.status();
        run.job
            .transition(next)
            .map_err(|e| Stop::Failed(e.to_string()))?;
        run.media
            .transition(next)
            .map_err(|e| Stop::Failed(e.to_string()))?;
        self.ctx.repo.save_pair(&run.job, &run.media).await?;
        self.ctx.log(&run.job.id, &format!("{from} -> {next}")).await;
        self.ctx.notifier.status_changed(&run.job);
        debug!(from = %from, to = %next, "phase transition");
        Ok(())
    }

    /// Terminal cancel (`message == None`) or failure. Persisting is best
    /// effort; the job is left as it was if the store is unreachable.
    async fn finish(&self, run: &mut Run, message: Option<String>) {
        let from = run.job.status();
        let (job_result, line) = match &message {
            Some(message) => {
                if let Err(e) = run.media.fail(message.clone()) {
                    debug!(error = %e, "media already terminal");
                }
                (run.job.fail(message.clone()), format!("{from} -> failed: {message}"))
            }
            None => {
                if let Err(e) = run.media.transition(JobStatus::Cancelled) {
                    debug!(error = %e, "media already terminal");
                }
                (run.job.cancel(), format!("{from} -> cancelled"))
            }
        };
        if let Err(e) = job_result {
            warn!(error = %e, "job already terminal");
            return;
        }

        if let Err(e) = self.ctx.repo.save_pair(&run.job, &run.media).await {
            error!(error = %e, "cannot persist terminal job state");
        }
        self.ctx.log(&run.job.id, &line).await;
        self.ctx.notifier.status_changed(&run.job);
        match message {
            Some(message) => warn!(phase = %from, error = %message, "job failed"),
            None => info!(phase = %from, "job cancelled"),
        }
    }

    /// Fails the running phase when the filesystem holding `dir` is below
    /// the free-space floor.
    fn ensure_disk_space(&self, dir: &Path) -> Result<(), Stop> {
        let (enough, stats) = self.ctx.governor.has_disk_space(Some(dir));
        if enough {
            return Ok(());
        }
        let reason = match stats {
            Some(stats) => ThrottleReason::LowDisk(stats).to_string(),
            None => format!("cannot query free space for {}", dir.display()),
        };
        warn!(path = %dir.display(), reason = %reason, "out of disk space mid-run");
        Err(Stop::Failed(EngineError::ResourceExhausted(reason).to_string()))
    }

    fn stop(&self, backend_cancelled: bool, message: String) -> Stop {
        if backend_cancelled || self.cancel.load(Ordering::SeqCst) {
            Stop::Cancelled
        } else {
            Stop::Failed(message)
        }
    }

    /// Drives `work` while copying backend progress into the store.
    async fn with_progress<F, T>(&self, media: &Media, phase: Phase, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut snapshot = media.clone();
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.tick().await;
        tokio::pin!(work);
        let mut last = 0u8;
        loop {
            tokio::select! {
                out = &mut work => return out,
                _ = ticker.tick() => {
                    let value = match phase {
                        Phase::Download => self.ctx.resolver.progress(&snapshot.id),
                        Phase::Convert => self.ctx.converter.progress(&snapshot.id),
                    };
                    if value == last {
                        continue;
                    }
                    last = value;
                    match phase {
                        Phase::Download => snapshot.set_download_progress(i64::from(value)),
                        Phase::Convert => snapshot.set_conversion_progress(i64::from(value)),
                    }
                    if let Err(e) = self.ctx.repo.save_media(&snapshot).await {
                        warn!(error = %e, "cannot persist progress");
                    }
                }
            }
        }
    }

    async fn remove_job_temp(&self) {
        let dir = self.ctx.config.temp_dir.join(&self.job_id);
        if tokio::fs::metadata(&dir).await.is_ok() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(path = %dir.display(), error = %e, "cannot remove job temp directory");
            }
        }
    }
}

/// Conversion target inside the job's temp directory, never the input
/// itself.
fn conversion_output(
    gate: &SecurityGate,
    temp_root: &Path,
    dir: &Path,
    stem: &str,
    extension: &str,
    input: &Path,
) -> Result<PathBuf, SecurityRejection> {
    let mut output = dir.join(format!("{stem}.{extension}"));
    if output == input {
        output = dir.join(format!("{stem}_converted.{extension}"));
    }
    gate.validate_path(&output, Some(temp_root))
}

/// Moves `converted` straight into `base` without the taxonomy.
async fn place_flat(ctx: &EngineContext, converted: &Path, base: &Path) -> Result<PathBuf, Stop> {
    let file_name = converted
        .file_name()
        .ok_or_else(|| Stop::Failed(format!("{} has no file name", converted.display())))?;
    tokio::fs::create_dir_all(base)
        .await
        .map_err(|e| Stop::Failed(format!("cannot create {}: {e}", base.display())))?;
    let destination = ctx
        .gate
        .validate_path(&base.join(file_name), Some(base))
        .map_err(|e| Stop::Failed(e.to_string()))?;
    if tokio::fs::rename(converted, &destination).await.is_err() {
        tokio::fs::copy(converted, &destination)
            .await
            .map_err(|e| Stop::Failed(format!("cannot move output: {e}")))?;
        if let Err(e) = tokio::fs::remove_file(converted).await {
            warn!(path = %converted.display(), error = %e, "cannot remove converted file");
        }
    }
    Ok(destination)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
