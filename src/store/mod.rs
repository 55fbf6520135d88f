//! SQLite-backed persistence for media items and conversion jobs.
//!
//! The store is the source of truth for every job: the scheduler's worker
//! registry is only a liveness cache that can be rebuilt from it.
//!
//! # Overview
//!
//! - [`Store`] - main interface, wraps a [`Database`]
//! - [`MediaRepository`] / [`JobRepository`] - data-access seams the engine
//!   depends on
//! - [`StoreError`] - operation error types
//!
//! # Example
//!
//! ```ignore
//! use mediaflow_core::store::Store;
//! use mediaflow_core::model::{ConversionJob, ConversionOptions, Media, ContentKind, ProviderKind};
//! use mediaflow_core::Database;
//!
//! let store = Store::new(Database::new_in_memory().await?);
//! let media = Media::new("movie.mp4", ProviderKind::LocalFile, ContentKind::Movie);
//! let job = ConversionJob::new(&media.id, ConversionOptions::default());
//! store.save_pair(&job, &media).await?;
//! ```

mod error;
mod repository;
mod rows;

pub use error::{DbErrorKind, Entity, StoreError};
pub use repository::{JobRepository, MediaRepository, Repository};

use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::model::{ContentKind, ConversionJob, JobStatus, Media};
use rows::{JobRow, MediaRow, path_text, to_json};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

const UPSERT_MEDIA: &str = r"INSERT INTO media (
        id, source, source_kind, content_kind, status, metadata,
        downloaded_path, output_path, error_message,
        download_progress, conversion_progress, created_at, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        content_kind = excluded.content_kind,
        status = excluded.status,
        metadata = excluded.metadata,
        downloaded_path = excluded.downloaded_path,
        output_path = excluded.output_path,
        error_message = excluded.error_message,
        download_progress = excluded.download_progress,
        conversion_progress = excluded.conversion_progress,
        updated_at = excluded.updated_at";

const UPSERT_JOB: &str = r"INSERT INTO conversion_jobs (
        id, media_id, options, status, error_message, created_at, started_at, completed_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        status = excluded.status,
        error_message = excluded.error_message,
        started_at = excluded.started_at,
        completed_at = excluded.completed_at";

/// Terminal statuses as bound SQL parameters, in a fixed order.
const TERMINAL: [JobStatus; 3] = [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

/// Persistence manager for media and jobs.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Media ====================

    /// Inserts or updates a media item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    #[instrument(skip(self, media), fields(media_id = %media.id, status = %media.status()))]
    pub async fn save_media(&self, media: &Media) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        write_media(&mut tx, media).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Looks up a media item by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn get_media(&self, id: &str) -> Result<Option<Media>> {
        let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(Media::try_from).transpose()
    }

    /// Media items in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn media_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Media>> {
        let rows = sqlx::query_as::<_, MediaRow>(
            r"SELECT * FROM media WHERE status = ?
              ORDER BY created_at ASC LIMIT ? OFFSET ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(Media::try_from).collect()
    }

    /// Media whose source or metadata contains `keyword`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn search_media(&self, keyword: &str, limit: i64, offset: i64) -> Result<Vec<Media>> {
        let pattern = like_pattern(keyword);
        let rows = sqlx::query_as::<_, MediaRow>(
            r"SELECT * FROM media
              WHERE source LIKE ? ESCAPE '\' OR metadata LIKE ? ESCAPE '\'
              ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(Media::try_from).collect()
    }

    /// Deletes terminal media last updated more than `days` ago that no
    /// longer have any job. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_media_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = cutoff(days);
        let result = sqlx::query(
            r"DELETE FROM media
              WHERE status IN (?, ?, ?)
                AND updated_at < ?
                AND NOT EXISTS (SELECT 1 FROM conversion_jobs j WHERE j.media_id = media.id)",
        )
        .bind(TERMINAL[0].as_str())
        .bind(TERMINAL[1].as_str())
        .bind(TERMINAL[2].as_str())
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;
        debug!(removed = result.rows_affected(), "deleted old media");
        Ok(result.rows_affected())
    }

    /// Media counts grouped by content kind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an unknown kind.
    #[instrument(skip(self))]
    pub async fn count_media_by_kind(&self) -> Result<Vec<(ContentKind, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT content_kind, COUNT(*) FROM media GROUP BY content_kind")
                .fetch_all(self.db.pool())
                .await?;
        rows.into_iter()
            .map(|(kind, count)| {
                kind.parse::<ContentKind>()
                    .map(|kind| (kind, count))
                    .map_err(|reason: String| StoreError::corrupt(Entity::Media, kind, reason))
            })
            .collect()
    }

    // ==================== Jobs ====================

    /// Inserts or updates a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails (including a
    /// dangling `media_id`).
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status()))]
    pub async fn save_job(&self, job: &ConversionJob) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        write_job(&mut tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Writes a job and its media in one transaction so their statuses
    /// never diverge on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if either write fails; neither is
    /// applied in that case.
    #[instrument(skip(self, job, media), fields(job_id = %job.id, media_id = %media.id, status = %job.status()))]
    pub async fn save_pair(&self, job: &ConversionJob, media: &Media) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        write_media(&mut tx, media).await?;
        write_job(&mut tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Looks up a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn get_job(&self, id: &str) -> Result<Option<ConversionJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM conversion_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(ConversionJob::try_from).transpose()
    }

    /// Jobs in `status` in admission order (oldest first).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversionJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r"SELECT * FROM conversion_jobs WHERE status = ?
              ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(ConversionJob::try_from).collect()
    }

    /// Every job whose status is non-terminal, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn active_jobs(&self) -> Result<Vec<ConversionJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r"SELECT * FROM conversion_jobs WHERE status NOT IN (?, ?, ?)
              ORDER BY created_at ASC, rowid ASC",
        )
        .bind(TERMINAL[0].as_str())
        .bind(TERMINAL[1].as_str())
        .bind(TERMINAL[2].as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(ConversionJob::try_from).collect()
    }

    /// All jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<ConversionJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r"SELECT * FROM conversion_jobs
              ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(ConversionJob::try_from).collect()
    }

    /// Jobs whose media source, metadata or error text contains `keyword`,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn search_jobs(
        &self,
        keyword: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversionJob>> {
        let pattern = like_pattern(keyword);
        let rows = sqlx::query_as::<_, JobRow>(
            r"SELECT j.* FROM conversion_jobs j
              JOIN media m ON m.id = j.media_id
              WHERE m.source LIKE ?1 ESCAPE '\'
                 OR m.metadata LIKE ?1 ESCAPE '\'
                 OR j.error_message LIKE ?1 ESCAPE '\'
              ORDER BY j.created_at DESC, j.rowid DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(ConversionJob::try_from).collect()
    }

    /// Jobs that reference `media_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an undecodable row.
    #[instrument(skip(self))]
    pub async fn jobs_for_media(&self, media_id: &str) -> Result<Vec<ConversionJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM conversion_jobs WHERE media_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(media_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(ConversionJob::try_from).collect()
    }

    /// Deletes terminal jobs (and their logs) that finished more than `days`
    /// ago. Pending and running jobs are never touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_jobs_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = cutoff(days);
        let result = sqlx::query(
            r"DELETE FROM conversion_jobs
              WHERE status IN (?, ?, ?)
                AND COALESCE(completed_at, created_at) < ?",
        )
        .bind(TERMINAL[0].as_str())
        .bind(TERMINAL[1].as_str())
        .bind(TERMINAL[2].as_str())
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;
        debug!(removed = result.rows_affected(), "deleted old jobs");
        Ok(result.rows_affected())
    }

    /// Total number of jobs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_jobs(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversion_jobs")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Job counts for every status (zero-filled).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or an unknown status.
    #[instrument(skip(self))]
    pub async fn count_jobs_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM conversion_jobs GROUP BY status")
                .fetch_all(self.db.pool())
                .await?;
        let mut counts: Vec<(JobStatus, i64)> =
            JobStatus::ALL.into_iter().map(|status| (status, 0)).collect();
        for (status, count) in rows {
            let status: JobStatus = status
                .parse()
                .map_err(|reason: String| StoreError::corrupt(Entity::Job, status.clone(), reason))?;
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == status) {
                slot.1 = count;
            }
        }
        Ok(counts)
    }

    /// Number of jobs that reached `status` at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_jobs_finished_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM conversion_jobs WHERE status = ? AND completed_at >= ?",
        )
        .bind(status.as_str())
        .bind(since)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    // ==================== Job log ====================

    /// Appends one line to a job's progress log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self, line))]
    pub async fn append_log(&self, job_id: &str, line: &str) -> Result<()> {
        sqlx::query("INSERT INTO job_log (job_id, line, created_at) VALUES (?, ?, ?)")
            .bind(job_id)
            .bind(line)
            .bind(Utc::now())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// A job's log lines in append order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn job_logs(&self, job_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT line FROM job_log WHERE job_id = ? ORDER BY id ASC")
                .bind(job_id)
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows.into_iter().map(|(line,)| line).collect())
    }
}

async fn write_media(tx: &mut Transaction<'_, Sqlite>, media: &Media) -> Result<()> {
    let metadata = to_json(Entity::Media, &media.id, &media.metadata)?;
    sqlx::query(UPSERT_MEDIA)
        .bind(&media.id)
        .bind(&media.source)
        .bind(media.source_kind.as_str())
        .bind(media.content_kind.as_str())
        .bind(media.status().as_str())
        .bind(metadata)
        .bind(path_text(media.downloaded_path.as_deref()))
        .bind(path_text(media.output_path()))
        .bind(media.error_message.as_deref())
        .bind(i64::from(media.download_progress()))
        .bind(i64::from(media.conversion_progress()))
        .bind(media.created_at)
        .bind(media.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn write_job(tx: &mut Transaction<'_, Sqlite>, job: &ConversionJob) -> Result<()> {
    let options = to_json(Entity::Job, &job.id, &job.options)?;
    sqlx::query(UPSERT_JOB)
        .bind(&job.id)
        .bind(&job.media_id)
        .bind(options)
        .bind(job.status().as_str())
        .bind(job.error_message.as_deref())
        .bind(job.created_at)
        .bind(job.started_at())
        .bind(job.completed_at())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn cutoff(days: u32) -> DateTime<Utc> {
    Utc::now() - Duration::days(i64::from(days))
}

/// `%keyword%` with LIKE wildcards in the keyword escaped.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
