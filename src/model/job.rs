//! Conversion jobs: one supervised pipeline attempt for a media item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversionOptions, InvalidTransition, JobStatus};

/// One attempt at running the pipeline for a media item.
///
/// The job references its media by id only. Its progress log lives in the
/// store as an append-only sequence of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionJob {
    pub id: String,
    pub media_id: String,
    pub options: ConversionOptions,
    status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    /// Creates a pending job for `media_id`.
    #[must_use]
    pub fn new(media_id: impl Into<String>, options: ConversionOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            media_id: media_id.into(),
            options,
            status: JobStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Rebuilds a job from persisted columns.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_parts(
        id: String,
        media_id: String,
        options: ConversionOptions,
        status: JobStatus,
        error_message: Option<String>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            media_id,
            options,
            status,
            error_message,
            created_at,
            started_at,
            completed_at,
        }
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Moves to `target`, stamping `started_at` when work begins and
    /// `completed_at` on any terminal state. A job that ends without having
    /// started gets `started_at = completed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the table forbids the move.
    pub fn transition(&mut self, target: JobStatus) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(target)?;
        let now = Utc::now();
        if target == JobStatus::Downloading {
            self.started_at.get_or_insert(now);
        }
        if target.is_terminal() {
            let started = *self.started_at.get_or_insert(now);
            self.completed_at = Some(now.max(started));
        }
        Ok(())
    }

    /// Terminal failure with a message.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the job is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Terminal cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the job is already terminal.
    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Cancelled)
    }

    /// Wall-clock run time once the job has finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
