//! Streaming HTTP downloader for direct URLs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::redirect::Policy;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::{BackendError, DownloadTarget, Downloader};
use crate::model::Media;
use crate::security::{SecurityGate, sanitize_filename};
use crate::user_agent;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const READ_TIMEOUT_SECS: u64 = 300;
const MAX_REDIRECTS: usize = 10;
const TOOL: &str = "http";

/// Builds the shared HTTP client used for downloads, searches and webhooks.
///
/// # Errors
///
/// Returns the `reqwest` builder error.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
        .redirect(gated_redirects())
        .build()
}

/// Follows redirects only to hosts the URL gate accepts.
fn gated_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match SecurityGate::default().validate_url(attempt.url().as_str()) {
            Ok(_) => attempt.follow(),
            Err(rejection) => {
                debug!(url = %attempt.url(), error = %rejection, "redirect refused");
                attempt.error(rejection)
            }
        }
    })
}

/// Downloads a URL by streaming the body to disk.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
    gate: SecurityGate,
    timeout: Duration,
    progress: DashMap<String, u8>,
    cancels: DashMap<String, Arc<AtomicBool>>,
}

impl HttpDownloader {
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            gate: SecurityGate::default(),
            timeout,
            progress: DashMap::new(),
            cancels: DashMap::new(),
        }
    }

    async fn fetch(
        &self,
        media_id: &str,
        url: &Url,
        destination: &Path,
        cancelled: &AtomicBool,
    ) -> Result<PathBuf, BackendError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| BackendError::http(url.as_str(), e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::http(url.as_str(), format!("HTTP {}", status.as_u16())));
        }

        let file_path = self.gate.validate_path(
            &destination.join(response_filename(&response, url)),
            Some(destination),
        )?;
        let total = response.content_length().filter(|len| *len > 0);
        debug!(path = %file_path.display(), total, "streaming response body");

        let file = File::create(&file_path)
            .await
            .map_err(|e| BackendError::io(&file_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        let streamed: Result<(), BackendError> = async {
            while let Some(chunk) = stream.next().await {
                if cancelled.load(Ordering::SeqCst) {
                    return Err(BackendError::cancelled(TOOL));
                }
                let chunk = chunk.map_err(|e| BackendError::http(url.as_str(), e.to_string()))?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| BackendError::io(&file_path, e))?;
                written += chunk.len() as u64;
                if let Some(total) = total {
                    self.progress
                        .insert(media_id.to_string(), percent_of(written, total));
                }
            }
            writer
                .flush()
                .await
                .map_err(|e| BackendError::io(&file_path, e))
        }
        .await;

        if let Err(error) = streamed {
            if let Err(e) = tokio::fs::remove_file(&file_path).await {
                debug!(path = %file_path.display(), error = %e, "cannot remove partial file");
            }
            return Err(error);
        }

        info!(path = %file_path.display(), bytes = written, "download complete");
        Ok(file_path)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        TOOL
    }

    #[instrument(skip(self, media, destination), fields(media_id = %media.id, target = %target))]
    async fn download(
        &self,
        media: &Media,
        target: &DownloadTarget,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, BackendError> {
        let url = Url::parse(&target.location)
            .map_err(|e| BackendError::InvalidInput(format!("invalid URL {}: {e}", target.location)))?;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancels
            .insert(media.id.clone(), Arc::clone(&cancelled));
        self.progress.insert(media.id.clone(), 0);

        let result = tokio::time::timeout(
            self.timeout,
            self.fetch(&media.id, &url, destination, &cancelled),
        )
        .await;
        self.cancels.remove(&media.id);

        let path = result.map_err(|_| BackendError::timeout(TOOL, self.timeout.as_secs()))??;
        self.progress.insert(media.id.clone(), 100);
        Ok(vec![path])
    }

    fn progress(&self, media_id: &str) -> u8 {
        self.progress.get(media_id).map_or(0, |p| *p)
    }

    fn cancel(&self, media_id: &str) -> bool {
        match self.cancels.get(media_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn forget(&self, media_id: &str) {
        self.progress.remove(media_id);
    }
}

fn percent_of(done: u64, total: u64) -> u8 {
    let percent = done.saturating_mul(100) / total.max(1);
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// File name from Content-Disposition, else the last URL path segment.
fn response_filename(response: &reqwest::Response, url: &Url) -> String {
    let from_header = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(disposition_filename);
    if let Some(name) = from_header {
        return sanitize_filename(&name);
    }

    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |s| s.into_owned())
        });
    match from_path {
        Some(name) => sanitize_filename(&name),
        None => "download.bin".to_string(),
    }
}

fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let value = value.trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ContentKind, ProviderKind};
    use crate::security::SecurityRejection;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn media() -> Media {
        Media::new("https://example.com/x.mp4", ProviderKind::DirectUrl, ContentKind::Other)
    }

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(build_http_client().unwrap(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_http_download_streams_body_to_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video bytes".to_vec()))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let media = media();
        let target = DownloadTarget::new(
            ProviderKind::DirectUrl,
            format!("{}/videos/clip.mp4", server.uri()),
        );

        let http = downloader();
        let files = http.download(&media, &target, temp.path()).await.unwrap();

        assert_eq!(files, vec![temp.path().join("clip.mp4")]);
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"video bytes");
        assert_eq!(http.progress(&media.id), 100);

        http.forget(&media.id);
        assert_eq!(http.progress(&media.id), 0);
        assert!(http.progress.is_empty());
    }

    #[tokio::test]
    async fn test_http_download_uses_content_disposition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=\"Film 2020.mkv\"")
                    .set_body_bytes(b"mkv".to_vec()),
            )
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let target = DownloadTarget::new(ProviderKind::DirectUrl, format!("{}/dl", server.uri()));

        let files = downloader().download(&media(), &target, temp.path()).await.unwrap();
        assert!(files[0].ends_with("Film 2020.mkv"));
    }

    #[tokio::test]
    async fn test_http_download_refuses_script_file_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=run.sh")
                    .set_body_bytes(b"#!/bin/sh\n".to_vec()),
            )
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let target = DownloadTarget::new(ProviderKind::DirectUrl, format!("{}/dl", server.uri()));

        let err = downloader().download(&media(), &target, temp.path()).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Rejected(SecurityRejection::DeniedExtension { .. })
        ));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_redirect_to_internal_host_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start.mp4"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/internal.mp4", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
            .expect(0)
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let target =
            DownloadTarget::new(ProviderKind::DirectUrl, format!("{}/start.mp4", server.uri()));

        let err = downloader().download(&media(), &target, temp.path()).await.unwrap_err();
        assert!(matches!(err, BackendError::Http { .. }), "{err}");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_download_removes_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 4096])
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let media = media();
        let target =
            DownloadTarget::new(ProviderKind::DirectUrl, format!("{}/slow.mp4", server.uri()));
        let http = Arc::new(downloader());

        let running = {
            let http = Arc::clone(&http);
            let media = media.clone();
            let dir = temp.path().to_path_buf();
            tokio::spawn(async move { http.download(&media, &target, &dir).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(http.cancel(&media.id));

        let err = running.await.unwrap().unwrap_err();
        assert!(err.is_cancelled(), "{err}");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_http_download_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let target = DownloadTarget::new(ProviderKind::DirectUrl, format!("{}/gone.mp4", server.uri()));

        let err = downloader().download(&media(), &target, temp.path()).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"), "{err}");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_http_download_invalid_url() {
        let temp = TempDir::new().unwrap();
        let target = DownloadTarget::new(ProviderKind::DirectUrl, "not a url");
        let err = downloader().download(&media(), &target, temp.path()).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }

    #[test]
    fn test_cancel_unknown_media() {
        assert!(!downloader().cancel("nope"));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(300, 200), 100);
        assert_eq!(percent_of(0, 0), 0);
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename("attachment; filename=\"a b.mp4\"").unwrap(),
            "a b.mp4"
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
