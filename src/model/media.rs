//! Media items and their metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentKind, InvalidTransition, JobStatus, ProviderKind};

/// Descriptive and technical attributes of a media item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// `WIDTHxHEIGHT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Free-form extension map (integrity hash, provider details, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl MediaMetadata {
    /// Fills every unset field from `other`. Existing values win; custom
    /// entries are merged key by key with the same rule.
    pub fn fill_from(&mut self, other: MediaMetadata) {
        fn keep<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }

        keep(&mut self.title, other.title);
        keep(&mut self.year, other.year);
        keep(&mut self.season, other.season);
        keep(&mut self.episode, other.episode);
        keep(&mut self.artist, other.artist);
        keep(&mut self.album, other.album);
        keep(&mut self.duration_secs, other.duration_secs);
        keep(&mut self.resolution, other.resolution);
        keep(&mut self.frame_rate, other.frame_rate);
        keep(&mut self.video_codec, other.video_codec);
        keep(&mut self.audio_codec, other.audio_codec);
        keep(&mut self.bitrate, other.bitrate);
        keep(&mut self.file_size, other.file_size);
        for (key, value) in other.custom {
            self.custom.entry(key).or_insert(value);
        }
    }
}

/// Clamps an arbitrary progress reading into `0..=100`.
#[must_use]
pub fn clamp_progress(value: i64) -> u8 {
    // Clamped to 0..=100 first, so the narrowing cast is lossless.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamped = value.clamp(0, 100) as u8;
    clamped
}

/// The logical content item being acquired and transformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    /// Reference as submitted (path, URL, magnet or search text).
    pub source: String,
    pub source_kind: ProviderKind,
    pub content_kind: ContentKind,
    status: JobStatus,
    pub metadata: MediaMetadata,
    pub downloaded_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    pub error_message: Option<String>,
    download_progress: u8,
    conversion_progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    /// Creates a pending media item with a fresh id.
    #[must_use]
    pub fn new(source: impl Into<String>, source_kind: ProviderKind, content_kind: ContentKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            source_kind,
            content_kind,
            status: JobStatus::Pending,
            metadata: MediaMetadata::default(),
            downloaded_path: None,
            output_path: None,
            error_message: None,
            download_progress: 0,
            conversion_progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a media item from persisted columns. Progress is clamped and
    /// status/output are trusted as stored.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_parts(
        id: String,
        source: String,
        source_kind: ProviderKind,
        content_kind: ContentKind,
        status: JobStatus,
        metadata: MediaMetadata,
        downloaded_path: Option<PathBuf>,
        output_path: Option<PathBuf>,
        error_message: Option<String>,
        progress: (i64, i64),
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source,
            source_kind,
            content_kind,
            status,
            metadata,
            downloaded_path,
            output_path,
            error_message,
            download_progress: clamp_progress(progress.0),
            conversion_progress: clamp_progress(progress.1),
            created_at,
            updated_at,
        }
    }

    /// Fresh pending copy for a retry: same source, kinds and metadata,
    /// new id, no paths, progress or error.
    #[must_use]
    pub fn fresh_copy(&self) -> Self {
        let mut copy = Self::new(self.source.clone(), self.source_kind, self.content_kind);
        copy.metadata = self.metadata.clone();
        copy.metadata.custom.remove("file_hash");
        copy.metadata.custom.remove("hash_algorithm");
        copy
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    #[must_use]
    pub fn download_progress(&self) -> u8 {
        self.download_progress
    }

    #[must_use]
    pub fn conversion_progress(&self) -> u8 {
        self.conversion_progress
    }

    pub fn set_download_progress(&mut self, value: i64) {
        self.download_progress = clamp_progress(value);
        self.touch();
    }

    pub fn set_conversion_progress(&mut self, value: i64) {
        self.conversion_progress = clamp_progress(value);
        self.touch();
    }

    /// Moves to `target` if the transition table allows it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] otherwise; the item is left unchanged.
    pub fn transition(&mut self, target: JobStatus) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(target)?;
        self.touch();
        Ok(())
    }

    /// Records the organized location. Only legal while organizing.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] (towards `Completed`) when the item is
    /// in any other phase.
    pub fn record_output(&mut self, path: PathBuf) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Organizing {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        self.output_path = Some(path);
        self.touch();
        Ok(())
    }

    /// Terminal failure with a message.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the item is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Human-readable name: metadata title, else the source file stem, else
    /// the raw source.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(title) = self.metadata.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.to_string();
        }
        Path::new(&self.source)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map_or_else(|| self.source.clone(), ToString::to_string)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
