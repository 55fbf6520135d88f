//! Outbound notifications and workflow automation hooks.
//!
//! # Overview
//!
//! - [`NotificationSink`] - receives job and system events
//! - [`AutomationSink`] - receives every job status change
//! - [`Notifier`] - fans events out to all sinks without blocking the caller
//!
//! Delivery is best effort: a failing sink is logged at `warn` and never
//! affects the job that raised the event.

mod sinks;

pub use sinks::{LogNotifier, WebhookAutomation, WebhookNotifier};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::NotificationConfig;
use crate::model::{ConversionJob, JobStatus};

/// Kinds of event a sink can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobStarted,
    JobCompleted,
    JobFailed,
    JobCancelled,
    DiskSpaceLow,
    SystemError,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::JobCancelled => "job_cancelled",
            Self::DiskSpaceLow => "disk_space_low",
            Self::SystemError => "system_error",
        }
    }

    /// Event raised when a job reaches `status`, if any.
    #[must_use]
    pub fn for_status(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Downloading => Some(Self::JobStarted),
            JobStatus::Completed => Some(Self::JobCompleted),
            JobStatus::Failed => Some(Self::JobFailed),
            JobStatus::Cancelled => Some(Self::JobCancelled),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event with its payload.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    #[must_use]
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            job_id: None,
            media_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Event about a specific job.
    #[must_use]
    pub fn for_job(kind: EventKind, job: &ConversionJob, message: impl Into<String>) -> Self {
        Self {
            job_id: Some(job.id.clone()),
            media_id: Some(job.media_id.clone()),
            ..Self::new(kind, message)
        }
    }
}

/// Delivery failure of a sink.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook {url} failed: {message}")]
    Webhook { url: String, message: String },
}

impl NotifyError {
    #[must_use]
    pub fn webhook(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Webhook {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Receives notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Receives job status changes for workflow automation.
#[async_trait]
pub trait AutomationSink: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    async fn on_status_change(&self, job: &ConversionJob) -> Result<(), NotifyError>;
}

/// Fans events out to every configured sink.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
    automation: Vec<Arc<dyn AutomationSink>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        let automation: Vec<&str> = self.automation.iter().map(|s| s.name()).collect();
        f.debug_struct("Notifier")
            .field("sinks", &sinks)
            .field("automation", &automation)
            .finish()
    }
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn with_automation(mut self, sink: Arc<dyn AutomationSink>) -> Self {
        self.automation.push(sink);
        self
    }

    /// Log sink plus the webhooks named in `config`.
    #[must_use]
    pub fn from_config(config: &NotificationConfig, client: &reqwest::Client) -> Self {
        let mut notifier = Self::new().with_sink(Arc::new(LogNotifier));
        if let Some(url) = &config.webhook_url {
            notifier = notifier.with_sink(Arc::new(WebhookNotifier::new(url.clone(), client.clone())));
        }
        if let Some(url) = &config.automation_url {
            notifier =
                notifier.with_automation(Arc::new(WebhookAutomation::new(url.clone(), client.clone())));
        }
        notifier
    }

    /// Delivers to every sink and waits. Failures are logged.
    pub async fn deliver(&self, notification: &Notification) {
        for sink in &self.sinks {
            if let Err(error) = sink.send(notification).await {
                warn!(sink = sink.name(), event = %notification.kind, error = %error, "notification failed");
            }
        }
    }

    /// Delivers a status change to every automation sink and waits.
    pub async fn deliver_status(&self, job: &ConversionJob) {
        for sink in &self.automation {
            if let Err(error) = sink.on_status_change(job).await {
                warn!(sink = sink.name(), job_id = %job.id, error = %error, "automation hook failed");
            }
        }
    }

    /// Fire-and-forget [`Notifier::deliver`].
    pub fn notify(&self, notification: Notification) {
        if self.sinks.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move { notifier.deliver(&notification).await });
    }

    /// Fire-and-forget status change: automation hooks plus the matching
    /// event, if the status has one.
    pub fn status_changed(&self, job: &ConversionJob) {
        if let Some(kind) = EventKind::for_status(job.status()) {
            let message = match (&job.error_message, kind) {
                (Some(error), EventKind::JobFailed) => format!("job {} failed: {error}", job.id),
                _ => format!("job {} is {}", job.id, job.status()),
            };
            self.notify(Notification::for_job(kind, job, message));
        }
        if self.automation.is_empty() {
            return;
        }
        let notifier = self.clone();
        let job = job.clone();
        tokio::spawn(async move { notifier.deliver_status(&job).await });
    }
}
