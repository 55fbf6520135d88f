//! Integration tests for the SQLite store against a file-backed database.

use mediaflow_core::model::{
    ContentKind, ConversionJob, ConversionOptions, Media, MediaMetadata, OutputFormat,
    ProviderKind, VideoQuality,
};
use mediaflow_core::{Database, JobStatus, Store};
use tempfile::TempDir;

/// Helper to create a file-backed store with migrations applied.
async fn setup_store() -> (Store, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::new(&temp_dir.path().join("mediaflow.db"))
        .await
        .expect("Failed to create database");
    (Store::new(db), temp_dir)
}

fn pair(source: &str, kind: ProviderKind, content: ContentKind) -> (ConversionJob, Media) {
    let media = Media::new(source, kind, content);
    let job = ConversionJob::new(
        media.id.clone(),
        ConversionOptions::new(OutputFormat::Mkv, VideoQuality::Ultra),
    );
    (job, media)
}

// ==================== Persistence ====================

#[tokio::test]
async fn test_jobs_survive_reopening_database() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("mediaflow.db");

    let (mut job, mut media) = pair("Show Name S01E02", ProviderKind::Search, ContentKind::TvEpisode);
    job.options.custom_args = vec!["-tune".to_string(), "film".to_string()];
    media.metadata = MediaMetadata {
        title: Some("Show Name S01E02".to_string()),
        season: Some(1),
        episode: Some(2),
        ..MediaMetadata::default()
    };
    job.transition(JobStatus::Downloading).expect("valid transition");
    media.transition(JobStatus::Downloading).expect("valid transition");
    media.set_download_progress(42);

    {
        let db = Database::new(&db_path).await.expect("Failed to create database");
        let store = Store::new(db);
        store.save_pair(&job, &media).await.expect("Failed to save");
        store.append_log(&job.id, "pending -> downloading").await.expect("Failed to log");
    }

    let db = Database::new(&db_path).await.expect("Failed to reopen database");
    let store = Store::new(db);

    let loaded = store.get_job(&job.id).await.expect("Failed to get").unwrap();
    assert_eq!(loaded.status(), JobStatus::Downloading);
    assert_eq!(loaded.options.output_format, OutputFormat::Mkv);
    assert_eq!(loaded.options.quality, VideoQuality::Ultra);
    assert_eq!(loaded.options.custom_args, vec!["-tune", "film"]);
    assert!(loaded.started_at().is_some());

    let loaded_media = store.get_media(&media.id).await.expect("Failed to get").unwrap();
    assert_eq!(loaded_media.download_progress(), 42);
    assert_eq!(loaded_media.metadata.season, Some(1));
    assert_eq!(loaded_media.content_kind, ContentKind::TvEpisode);

    let logs = store.job_logs(&job.id).await.expect("Failed to read logs");
    assert_eq!(logs, vec!["pending -> downloading"]);
}

// ==================== Queries ====================

#[tokio::test]
async fn test_active_jobs_exclude_terminal() {
    let (store, _temp_dir) = setup_store().await;

    let (pending, pending_media) = pair("First Show S01E01", ProviderKind::Search, ContentKind::TvEpisode);
    let (mut failed, mut failed_media) =
        pair("Second Show S01E01", ProviderKind::Search, ContentKind::TvEpisode);
    failed.fail("boom").expect("valid transition");
    failed_media.fail("boom").expect("valid transition");

    store.save_pair(&pending, &pending_media).await.expect("Failed to save");
    store.save_pair(&failed, &failed_media).await.expect("Failed to save");

    let active = store.active_jobs().await.expect("Failed to list");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, pending.id);

    let failed_jobs = store
        .jobs_by_status(JobStatus::Failed, 10, 0)
        .await
        .expect("Failed to list");
    assert_eq!(failed_jobs.len(), 1);
    assert_eq!(failed_jobs[0].error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_counts_by_kind_and_status() {
    let (store, _temp_dir) = setup_store().await;
    for (source, content) in [
        ("Show One S01E01", ContentKind::TvEpisode),
        ("Show Two S01E01", ContentKind::TvEpisode),
        ("Some Film 2020", ContentKind::Movie),
    ] {
        let (job, media) = pair(source, ProviderKind::Search, content);
        store.save_pair(&job, &media).await.expect("Failed to save");
    }

    assert_eq!(store.count_jobs().await.expect("Failed to count"), 3);

    let by_kind = store.count_media_by_kind().await.expect("Failed to count");
    let tv = by_kind
        .iter()
        .find(|(kind, _)| *kind == ContentKind::TvEpisode)
        .map(|(_, count)| *count);
    assert_eq!(tv, Some(2));

    let by_status = store.count_jobs_by_status().await.expect("Failed to count");
    let pending = by_status
        .iter()
        .find(|(status, _)| *status == JobStatus::Pending)
        .map(|(_, count)| *count);
    assert_eq!(pending, Some(3));
}

#[tokio::test]
async fn test_jobs_for_media_lists_in_creation_order() {
    let (store, _temp_dir) = setup_store().await;
    let (first, media) = pair("Some Film 2020", ProviderKind::Search, ContentKind::Movie);
    store.save_pair(&first, &media).await.expect("Failed to save");
    let second = ConversionJob::new(media.id.clone(), first.options.clone());
    store.save_job(&second).await.expect("Failed to save");

    let jobs = store.jobs_for_media(&media.id).await.expect("Failed to list");
    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
}

#[tokio::test]
async fn test_search_media_matches_title_metadata() {
    let (store, _temp_dir) = setup_store().await;
    let (job, mut media) = pair("/inbox/a1b2c3.mp4", ProviderKind::LocalFile, ContentKind::Movie);
    media.metadata.title = Some("Arrival".to_string());
    store.save_pair(&job, &media).await.expect("Failed to save");

    let found = store.search_media("Arrival", 10, 0).await.expect("Failed to search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, media.id);

    let none = store.search_media("Nothing", 10, 0).await.expect("Failed to search");
    assert!(none.is_empty());
}
