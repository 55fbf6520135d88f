//! Integration tests for the HTTP-facing pieces driven through the engine:
//! index search, the URL gate on search results and webhook delivery.

mod support;

use std::sync::Arc;
use std::time::Duration;

use mediaflow_core::backend::{HttpDownloader, build_http_client};
use mediaflow_core::config::NotificationConfig;
use mediaflow_core::JobStatus;
use mediaflow_core::engine::SubmitRequest;
use mediaflow_core::model::ProviderKind;
use mediaflow_core::notify::Notifier;
use mediaflow_core::resolver::IndexSearch;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{TestEngineBuilder, WritingDownloader};

// ==================== Index search ====================

#[tokio::test]
async fn test_peer_to_peer_index_feeds_magnet_to_downloader() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Show Name S01E02"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="magnet:?xt=urn:btih:0123abcd&amp;dn=Show.Name.S01E02">get</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = build_http_client().expect("Failed to build client");
    let template = format!("{}/search?q={{query}}", server.uri());
    let downloader = WritingDownloader::new("aria2c", "Show.Name.S01E02.mkv.mp4");
    let te = TestEngineBuilder::new()
        .downloader(ProviderKind::PeerToPeer, downloader.clone())
        .search(vec![Arc::new(IndexSearch::peer_to_peer(template, client))])
        .build()
        .await;

    let job = te
        .engine
        .submit(SubmitRequest::new("Show Name S01E02"))
        .await
        .expect("Failed to submit");
    te.run_once().await;

    let details = te.engine.get_job(&job.id).await.expect("Failed to get job");
    assert_eq!(details.job.status(), JobStatus::Completed);
    assert_eq!(downloader.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let logs = te.engine.job_logs(&job.id).await.expect("Failed to get logs");
    assert!(
        logs.iter()
            .any(|line| line.contains("magnet:?xt=urn:btih:0123abcd&dn=Show.Name.S01E02")),
        "logs: {logs:?}"
    );
}

#[tokio::test]
async fn test_search_result_on_private_host_is_never_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="/files/show.mp4">show</a>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/show.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(support::MP4_BYTES))
        .expect(0)
        .mount(&server)
        .await;

    let client = build_http_client().expect("Failed to build client");
    let template = format!("{}/search?q={{query}}", server.uri());
    let te = TestEngineBuilder::new()
        .downloader(
            ProviderKind::DirectUrl,
            Arc::new(HttpDownloader::new(client.clone(), Duration::from_secs(10))),
        )
        .search(vec![Arc::new(IndexSearch::direct(template, client))])
        .build()
        .await;

    let job = te
        .engine
        .submit(SubmitRequest::new("Some Film 2020"))
        .await
        .expect("Failed to submit");
    te.run_once().await;

    let details = te.engine.get_job(&job.id).await.expect("Failed to get job");
    assert_eq!(details.job.status(), JobStatus::Failed);

    let requests = server.received_requests().await.expect("request recording enabled");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/search");
}

#[tokio::test]
async fn test_index_error_status_moves_to_next_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/working"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="magnet:?xt=urn:btih:feed">x</a>"#),
        )
        .mount(&server)
        .await;

    let client = build_http_client().expect("Failed to build client");
    let te = TestEngineBuilder::new()
        .downloader(
            ProviderKind::PeerToPeer,
            WritingDownloader::new("aria2c", "Some.Film.2020.mp4"),
        )
        .search(vec![
            Arc::new(IndexSearch::peer_to_peer(
                format!("{}/broken?q={{query}}", server.uri()),
                client.clone(),
            )),
            Arc::new(IndexSearch::peer_to_peer(
                format!("{}/working?q={{query}}", server.uri()),
                client,
            )),
        ])
        .build()
        .await;

    let job = te
        .engine
        .submit(SubmitRequest::new("Some Film 2020"))
        .await
        .expect("Failed to submit");
    te.run_once().await;

    let details = te.engine.get_job(&job.id).await.expect("Failed to get job");
    assert_eq!(details.job.status(), JobStatus::Completed);
    let logs = te.engine.job_logs(&job.id).await.expect("Failed to get logs");
    assert!(logs.iter().any(|line| line.contains("HTTP 503")), "logs: {logs:?}");
}

// ==================== Webhooks ====================

#[tokio::test]
async fn test_webhooks_receive_completion_and_status_changes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(body_partial_json(serde_json::json!({ "event_type": "job_completed" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/automation"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = build_http_client().expect("Failed to build client");
    let notifier = Notifier::from_config(
        &NotificationConfig {
            webhook_url: Some(format!("{}/events", server.uri())),
            automation_url: Some(format!("{}/automation", server.uri())),
        },
        &client,
    );
    let te = TestEngineBuilder::new().notifier(notifier).build().await;
    let source = te.local_video("movie_2021_1080p.mp4");
    let job = te
        .engine
        .submit(SubmitRequest::new(source.display().to_string()))
        .await
        .expect("Failed to submit");
    te.run_once().await;

    let mut statuses = Vec::new();
    for _ in 0..100 {
        let requests = server.received_requests().await.expect("request recording enabled");
        statuses = requests
            .iter()
            .filter(|r| r.url.path() == "/automation")
            .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
            .filter(|body| body["job_id"] == job.id.as_str())
            .filter_map(|body| body["status"].as_str().map(ToString::to_string))
            .collect();
        let completed_event = requests.iter().any(|r| {
            r.url.path() == "/events"
                && String::from_utf8_lossy(&r.body).contains("job_completed")
        });
        if statuses.len() == 5 && completed_event {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    statuses.sort();
    assert_eq!(
        statuses,
        vec!["completed", "converting", "downloading", "organizing", "processing"]
    );
}
