//! Repository seams for media and job persistence.
//!
//! The engine and scheduler depend on these traits rather than on [`Store`]
//! directly, so tests can swap in a different backing store and the
//! persistence boundary stays limited to these query shapes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Result, Store};
use crate::model::{ContentKind, ConversionJob, JobStatus, Media};

/// Data-access contract for media items.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Inserts or updates a media item.
    async fn save_media(&self, media: &Media) -> Result<()>;

    /// Looks up a media item by id.
    async fn get_media(&self, id: &str) -> Result<Option<Media>>;

    /// Media in a status, oldest first.
    async fn media_by_status(&self, status: JobStatus, limit: i64, offset: i64)
    -> Result<Vec<Media>>;

    /// Media matching a keyword, newest first.
    async fn search_media(&self, keyword: &str, limit: i64, offset: i64) -> Result<Vec<Media>>;

    /// Removes terminal, job-less media older than `days`.
    async fn delete_media_older_than(&self, days: u32) -> Result<u64>;

    /// Media counts per content kind.
    async fn count_media_by_kind(&self) -> Result<Vec<(ContentKind, i64)>>;
}

/// Data-access contract for conversion jobs and their logs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts or updates a job.
    async fn save_job(&self, job: &ConversionJob) -> Result<()>;

    /// Writes a job and its media atomically.
    async fn save_pair(&self, job: &ConversionJob, media: &Media) -> Result<()>;

    /// Looks up a job by id.
    async fn get_job(&self, id: &str) -> Result<Option<ConversionJob>>;

    /// Jobs in a status, in admission order.
    async fn jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversionJob>>;

    /// All non-terminal jobs.
    async fn active_jobs(&self) -> Result<Vec<ConversionJob>>;

    /// All jobs, newest first.
    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<ConversionJob>>;

    /// Jobs matching a keyword, newest first.
    async fn search_jobs(&self, keyword: &str, limit: i64, offset: i64)
    -> Result<Vec<ConversionJob>>;

    /// Jobs that reference a media item.
    async fn jobs_for_media(&self, media_id: &str) -> Result<Vec<ConversionJob>>;

    /// Removes terminal jobs that finished more than `days` ago.
    async fn delete_jobs_older_than(&self, days: u32) -> Result<u64>;

    /// Total job count.
    async fn count_jobs(&self) -> Result<i64>;

    /// Job counts for every status.
    async fn count_jobs_by_status(&self) -> Result<Vec<(JobStatus, i64)>>;

    /// Jobs that reached `status` since a point in time.
    async fn count_jobs_finished_since(&self, status: JobStatus, since: DateTime<Utc>)
    -> Result<i64>;

    /// Appends a progress line to a job's log.
    async fn append_log(&self, job_id: &str, line: &str) -> Result<()>;

    /// A job's log lines in append order.
    async fn job_logs(&self, job_id: &str) -> Result<Vec<String>>;
}

/// Everything the engine needs from persistence.
pub trait Repository: MediaRepository + JobRepository {}

impl<T: MediaRepository + JobRepository> Repository for T {}

#[async_trait]
impl MediaRepository for Store {
    async fn save_media(&self, media: &Media) -> Result<()> {
        Store::save_media(self, media).await
    }

    async fn get_media(&self, id: &str) -> Result<Option<Media>> {
        Store::get_media(self, id).await
    }

    async fn media_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Media>> {
        Store::media_by_status(self, status, limit, offset).await
    }

    async fn search_media(&self, keyword: &str, limit: i64, offset: i64) -> Result<Vec<Media>> {
        Store::search_media(self, keyword, limit, offset).await
    }

    async fn delete_media_older_than(&self, days: u32) -> Result<u64> {
        Store::delete_media_older_than(self, days).await
    }

    async fn count_media_by_kind(&self) -> Result<Vec<(ContentKind, i64)>> {
        Store::count_media_by_kind(self).await
    }
}

#[async_trait]
impl JobRepository for Store {
    async fn save_job(&self, job: &ConversionJob) -> Result<()> {
        Store::save_job(self, job).await
    }

    async fn save_pair(&self, job: &ConversionJob, media: &Media) -> Result<()> {
        Store::save_pair(self, job, media).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<ConversionJob>> {
        Store::get_job(self, id).await
    }

    async fn jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversionJob>> {
        Store::jobs_by_status(self, status, limit, offset).await
    }

    async fn active_jobs(&self) -> Result<Vec<ConversionJob>> {
        Store::active_jobs(self).await
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<ConversionJob>> {
        Store::list_jobs(self, limit, offset).await
    }

    async fn search_jobs(
        &self,
        keyword: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversionJob>> {
        Store::search_jobs(self, keyword, limit, offset).await
    }

    async fn jobs_for_media(&self, media_id: &str) -> Result<Vec<ConversionJob>> {
        Store::jobs_for_media(self, media_id).await
    }

    async fn delete_jobs_older_than(&self, days: u32) -> Result<u64> {
        Store::delete_jobs_older_than(self, days).await
    }

    async fn count_jobs(&self) -> Result<i64> {
        Store::count_jobs(self).await
    }

    async fn count_jobs_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        Store::count_jobs_by_status(self).await
    }

    async fn count_jobs_finished_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        Store::count_jobs_finished_since(self, status, since).await
    }

    async fn append_log(&self, job_id: &str, line: &str) -> Result<()> {
        Store::append_log(self, job_id, line).await
    }

    async fn job_logs(&self, job_id: &str) -> Result<Vec<String>> {
        Store::job_logs(self, job_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::model::{ConversionOptions, ProviderKind};

    async fn pending_count(repo: &dyn Repository) -> usize {
        repo.jobs_by_status(JobStatus::Pending, 100, 0)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_repository_trait_object_delegates_lifecycle() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let repo: &dyn Repository = &store;

        let media = Media::new("clip.mp4", ProviderKind::LocalFile, ContentKind::Other);
        let mut job = ConversionJob::new(&media.id, ConversionOptions::default());
        repo.save_pair(&job, &media).await.unwrap();
        assert_eq!(pending_count(repo).await, 1);

        job.transition(JobStatus::Downloading).unwrap();
        repo.save_job(&job).await.unwrap();
        assert_eq!(pending_count(repo).await, 0);
        assert_eq!(repo.active_jobs().await.unwrap().len(), 1);

        repo.append_log(&job.id, "download started").await.unwrap();
        assert_eq!(repo.job_logs(&job.id).await.unwrap(), vec!["download started"]);
    }

    #[tokio::test]
    async fn test_repository_media_queries() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let repo: &dyn Repository = &store;

        let media = Media::new("Album - Artist.flac", ProviderKind::LocalFile, ContentKind::Music);
        repo.save_media(&media).await.unwrap();

        let found = repo.search_media("Album", 10, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        let by_kind = repo.count_media_by_kind().await.unwrap();
        assert_eq!(by_kind, vec![(ContentKind::Music, 1)]);
        let pending = repo.media_by_status(JobStatus::Pending, 10, 0).await.unwrap();
        assert_eq!(pending[0].id, media.id);
    }
}
