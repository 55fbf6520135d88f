//! Raw table rows and their conversion into domain values.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::error::{Entity, StoreError};
use crate::model::{ConversionJob, ConversionOptions, Media, MediaMetadata};

/// A row of the `media` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct MediaRow {
    pub id: String,
    pub source: String,
    pub source_kind: String,
    pub content_kind: String,
    pub status: String,
    pub metadata: String,
    pub downloaded_path: Option<String>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub download_progress: i64,
    pub conversion_progress: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MediaRow> for Media {
    type Error = StoreError;

    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::corrupt(Entity::Media, row.id.clone(), reason);
        let source_kind = row.source_kind.parse().map_err(corrupt)?;
        let content_kind = row.content_kind.parse().map_err(corrupt)?;
        let status = row.status.parse().map_err(corrupt)?;
        let metadata: MediaMetadata = serde_json::from_str(&row.metadata)
            .map_err(|error| corrupt(format!("metadata: {error}")))?;

        Ok(Media::from_parts(
            row.id,
            row.source,
            source_kind,
            content_kind,
            status,
            metadata,
            row.downloaded_path.map(PathBuf::from),
            row.output_path.map(PathBuf::from),
            row.error_message,
            (row.download_progress, row.conversion_progress),
            row.created_at,
            row.updated_at,
        ))
    }
}

/// A row of the `conversion_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub media_id: String,
    pub options: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ConversionJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|reason: String| StoreError::corrupt(Entity::Job, row.id.clone(), reason))?;
        let options: ConversionOptions = serde_json::from_str(&row.options)
            .map_err(|error| StoreError::corrupt(Entity::Job, row.id.clone(), format!("options: {error}")))?;

        Ok(ConversionJob::from_parts(
            row.id,
            row.media_id,
            options,
            status,
            row.error_message,
            row.created_at,
            row.started_at,
            row.completed_at,
        ))
    }
}

pub(crate) fn path_text(path: Option<&std::path::Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

pub(crate) fn to_json<T: serde::Serialize>(
    entity: Entity,
    id: &str,
    value: &T,
) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|error| StoreError::corrupt(entity, id, error))
}
