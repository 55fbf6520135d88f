//! Admission loop, worker registry and per-job locks.
//!
//! The scheduler polls the store for pending jobs, consults the resource
//! governor before each admission cycle, and spawns one worker task per
//! admitted job. The registry of running workers is a liveness cache only;
//! the store stays authoritative.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use super::pipeline::Worker;
use super::{EngineContext, EngineError};
use crate::governor::ThrottleReason;
use crate::model::JobStatus;
use crate::notify::{EventKind, Notification};

/// Message recorded on jobs a previous process left mid-run.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

struct WorkerEntry {
    media_id: String,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Running workers keyed by job id, behind a single lock.
#[derive(Default)]
pub(crate) struct WorkerRegistry {
    inner: Mutex<HashMap<String, WorkerEntry>>,
}

impl WorkerRegistry {
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub(crate) async fn contains(&self, job_id: &str) -> bool {
        self.inner.lock().await.contains_key(job_id)
    }

    /// Drops entries whose task ended without deregistering (a panic) and
    /// returns how many remain.
    async fn prune_finished(&self) -> usize {
        let mut workers = self.inner.lock().await;
        workers.retain(|job_id, entry| {
            let finished = entry.handle.as_ref().is_some_and(JoinHandle::is_finished);
            if finished {
                warn!(job_id = %job_id, "dropping finished worker from registry");
            }
            !finished
        });
        workers.len()
    }

    /// Sets the cancel flag of a running worker and returns its media id.
    pub(crate) async fn signal_cancel(&self, job_id: &str) -> Option<String> {
        let workers = self.inner.lock().await;
        let entry = workers.get(job_id)?;
        entry.cancel.store(true, Ordering::SeqCst);
        Some(entry.media_id.clone())
    }

    pub(crate) async fn remove(&self, job_id: &str) {
        self.inner.lock().await.remove(job_id);
    }

    /// Takes every join handle so the caller can await them.
    async fn take_handles(&self) -> Vec<(String, JoinHandle<()>)> {
        self.inner
            .lock()
            .await
            .iter_mut()
            .filter_map(|(id, entry)| entry.handle.take().map(|h| (id.clone(), h)))
            .collect()
    }
}

/// Lazily created per-job mutexes, dropped once no one holds them.
#[derive(Default)]
pub(crate) struct JobLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl JobLocks {
    fn entry(&self, job_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    pub(crate) async fn lock(&self, job_id: &str) -> OwnedMutexGuard<()> {
        self.entry(job_id).lock_owned().await
    }

    pub(crate) fn try_lock(&self, job_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(job_id).try_lock_owned().ok()
    }

    /// Drops the lock for `job_id` if nobody else holds a reference.
    pub(crate) fn release(&self, job_id: &str) {
        self.locks.remove_if(job_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// What one admission cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The governor refused new work.
    Throttled { reason: String },
    /// Workers were spawned for these jobs (possibly none).
    Admitted { job_ids: Vec<String> },
}

impl Admission {
    #[must_use]
    pub fn admitted(&self) -> usize {
        match self {
            Self::Throttled { .. } => 0,
            Self::Admitted { job_ids } => job_ids.len(),
        }
    }
}

/// Polls for pending jobs and hands them to workers.
#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<EngineContext>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("concurrency", &self.ctx.config.concurrency)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Marks jobs left in a running phase by a previous process as failed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store cannot be read or written.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<usize, EngineError> {
        let mut recovered = 0;
        for mut job in self.ctx.repo.active_jobs().await? {
            if !job.status().is_running() || self.ctx.workers.contains(&job.id).await {
                continue;
            }
            let from = job.status();
            if job.fail(INTERRUPTED_MESSAGE).is_err() {
                continue;
            }
            match self.ctx.repo.get_media(&job.media_id).await? {
                Some(mut media) => {
                    if let Err(e) = media.fail(INTERRUPTED_MESSAGE) {
                        debug!(media_id = %media.id, error = %e, "media already terminal");
                    }
                    self.ctx.repo.save_pair(&job, &media).await?;
                }
                None => self.ctx.repo.save_job(&job).await?,
            }
            self.ctx
                .log(&job.id, &format!("{from} -> failed: {INTERRUPTED_MESSAGE}"))
                .await;
            warn!(job_id = %job.id, phase = %from, "recovered interrupted job");
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Runs one admission cycle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if pending jobs cannot be listed and
    /// [`EngineError::Internal`] if the governor sample panics.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<Admission, EngineError> {
        let governor = self.ctx.governor.clone();
        let throttle = tokio::task::spawn_blocking(move || governor.throttle_reason())
            .await
            .map_err(|e| EngineError::internal(format!("governor sample panicked: {e}")))?;
        if let Some(reason) = throttle {
            info!(reason = %reason, "admission throttled");
            if matches!(reason, ThrottleReason::LowDisk(_)) {
                self.ctx
                    .notifier
                    .notify(Notification::new(EventKind::DiskSpaceLow, reason.to_string()));
            }
            return Ok(Admission::Throttled {
                reason: reason.to_string(),
            });
        }

        let running = self.ctx.workers.prune_finished().await;
        let slots = self.ctx.config.concurrency.saturating_sub(running);
        if slots == 0 {
            debug!(running, "no free worker slots");
            return Ok(Admission::Admitted { job_ids: Vec::new() });
        }

        let limit = i64::try_from(slots).unwrap_or(i64::MAX);
        let pending = self
            .ctx
            .repo
            .jobs_by_status(JobStatus::Pending, limit, 0)
            .await?;

        let mut admitted = Vec::new();
        let mut workers = self.ctx.workers.inner.lock().await;
        for job in pending {
            if workers.contains_key(&job.id) {
                continue;
            }
            let cancel = Arc::new(AtomicBool::new(false));
            let worker = Worker::new(Arc::clone(&self.ctx), job.id.clone(), Arc::clone(&cancel));
            let span = info_span!("worker", job_id = %job.id, media_id = %job.media_id);
            let handle = tokio::spawn(worker.run().instrument(span));
            workers.insert(
                job.id.clone(),
                WorkerEntry {
                    media_id: job.media_id.clone(),
                    cancel,
                    handle: Some(handle),
                },
            );
            admitted.push(job.id);
        }
        drop(workers);

        if !admitted.is_empty() {
            info!(count = admitted.len(), "admitted jobs");
        }
        Ok(Admission::Admitted { job_ids: admitted })
    }

    /// Polls until `shutdown` turns true, then waits for running workers.
    ///
    /// Interrupted jobs from a previous run are recovered first. A failed
    /// cycle is logged and retried on the next poll.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        match self.recover_interrupted().await {
            Ok(0) => {}
            Ok(count) => info!(count, "marked interrupted jobs as failed"),
            Err(e) => error!(error = %e, "crash recovery failed"),
        }

        let poll = Duration::from_secs(self.ctx.config.poll_interval_secs);
        let backoff = Duration::from_secs(self.ctx.config.throttle_backoff_secs);
        info!(
            concurrency = self.ctx.config.concurrency,
            poll_secs = poll.as_secs(),
            "scheduler started"
        );

        while !*shutdown.borrow() {
            let wait = match self.tick().await {
                Ok(Admission::Throttled { .. }) => backoff,
                Ok(Admission::Admitted { .. }) => poll,
                Err(e) => {
                    error!(error = %e, "admission cycle failed");
                    self.ctx
                        .notifier
                        .notify(Notification::new(EventKind::SystemError, e.to_string()));
                    poll
                }
            };
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopping, waiting for running workers");
        self.wait_idle().await;
    }

    /// Awaits every worker spawned so far.
    pub async fn wait_idle(&self) {
        for (job_id, handle) in self.ctx.workers.take_handles().await {
            if let Err(e) = handle.await {
                error!(job_id = %job_id, error = %e, "worker task panicked");
                self.ctx.workers.remove(&job_id).await;
            }
        }
    }

    /// Number of workers currently running.
    pub async fn active_workers(&self) -> usize {
        self.ctx.workers.len().await
    }
}
