//! Built-in notification and automation sinks.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{AutomationSink, EventKind, Notification, NotificationSink, NotifyError};
use crate::model::ConversionJob;

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.kind {
            EventKind::JobFailed | EventKind::DiskSpaceLow | EventKind::SystemError => warn!(
                event = %notification.kind,
                job_id = notification.job_id.as_deref().unwrap_or("-"),
                "{}", notification.message
            ),
            _ => info!(
                event = %notification.kind,
                job_id = notification.job_id.as_deref().unwrap_or("-"),
                "{}", notification.message
            ),
        }
        Ok(())
    }
}

async fn post_json(client: &Client, url: &str, body: &serde_json::Value) -> Result<(), NotifyError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| NotifyError::webhook(url, e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::webhook(url, format!("HTTP {}", status.as_u16())));
    }
    Ok(())
}

/// POSTs each notification as JSON.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    #[must_use]
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = json!({
            "event_type": notification.kind,
            "message": notification.message,
            "job_id": notification.job_id,
            "media_id": notification.media_id,
            "timestamp": notification.timestamp.to_rfc3339(),
        });
        post_json(&self.client, &self.url, &body).await?;
        debug!(event = %notification.kind, "webhook notification sent");
        Ok(())
    }
}

/// POSTs every job status change to a workflow endpoint.
#[derive(Debug, Clone)]
pub struct WebhookAutomation {
    url: String,
    client: Client,
}

impl WebhookAutomation {
    #[must_use]
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl AutomationSink for WebhookAutomation {
    fn name(&self) -> &str {
        "automation-webhook"
    }

    async fn on_status_change(&self, job: &ConversionJob) -> Result<(), NotifyError> {
        let body = json!({
            "job_id": job.id,
            "media_id": job.media_id,
            "status": job.status(),
            "error_message": job.error_message,
        });
        post_json(&self.client, &self.url, &body).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ConversionOptions;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_webhook_notifier_posts_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"event_type": "disk_space_low"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let sink = WebhookNotifier::new(format!("{}/hook", server.uri()), Client::new());
        sink.send(&Notification::new(EventKind::DiskSpaceLow, "only 10 MB left"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_notifier_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let sink = WebhookNotifier::new(server.uri(), Client::new());
        let err = sink
            .send(&Notification::new(EventKind::SystemError, "x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_automation_posts_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"status": "pending"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let job = ConversionJob::new("media-1", ConversionOptions::default());
        WebhookAutomation::new(server.uri(), Client::new())
            .on_status_change(&job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(
            LogNotifier
                .send(&Notification::new(EventKind::JobCompleted, "done"))
                .await
                .is_ok()
        );
    }
}
