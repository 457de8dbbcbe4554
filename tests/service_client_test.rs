// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP client tests against a mock download service.
//!
//! Run with: cargo test --test service_client_test

use std::time::Duration;

use dlsync::client::{DownloadService, HttpDownloadService};
use dlsync::download::{DownloadId, DownloadStatus, NewDownload, ThreadCount};
use dlsync::error::DownloadError;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn task(id: u64, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "url": "https://example.com/file.iso",
        "fileName": "file.iso",
        "numberOfThreads": 4,
        "status": status,
        "downloadedBytes": 512,
        "fileSize": 1024,
        "downloadSpeed": 256.0,
        "progress": 50.0,
        "createdAt": "2024-05-01T10:00:00",
        "completedAt": null
    })
}

async fn client_for(server: &MockServer) -> HttpDownloadService {
    HttpDownloadService::new(&format!("{}/api", server.uri())).unwrap()
}

#[tokio::test]
async fn test_create_posts_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/downloads"))
        .and(body_json(json!({
            "url": "https://example.com/file.iso",
            "fileName": "file.iso",
            "numberOfThreads": 8
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(task(1, "QUEUED")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let request = NewDownload::new("https://example.com/file.iso")
        .with_file_name("file.iso")
        .with_threads(ThreadCount::Eight);
    let created = client.create(&request).await.unwrap();

    assert_eq!(created.id, DownloadId::from(1u64));
    assert_eq!(created.status, DownloadStatus::Queued);
    assert_eq!(created.file_size, Some(1024));
}

#[tokio::test]
async fn test_create_omits_missing_file_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/downloads"))
        .and(body_json(json!({
            "url": "https://example.com/file.iso",
            "numberOfThreads": 4
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(task(2, "QUEUED")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .create(&NewDownload::new("https://example.com/file.iso"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_and_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/downloads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([task(1, "DOWNLOADING"), task(2, "PAUSED")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/downloads/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task(2, "PAUSED")))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let all = client.list().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].status, DownloadStatus::Downloading);

    let one = client.get(&"2".into()).await.unwrap();
    assert_eq!(one.status, DownloadStatus::Paused);
    assert_eq!(one.downloaded_bytes, 512);
}

#[tokio::test]
async fn test_unknown_file_size_is_none() {
    let server = MockServer::start().await;
    let mut body = task(3, "DOWNLOADING");
    body["fileSize"] = json!(-1);
    Mock::given(method("GET"))
        .and(path("/api/downloads/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let record = client.get(&"3".into()).await.unwrap();
    assert_eq!(record.file_size, None);
}

#[tokio::test]
async fn test_lifecycle_commands_hit_their_routes() {
    let server = MockServer::start().await;
    for action in ["pause", "resume", "cancel"] {
        Mock::given(method("POST"))
            .and(path(format!("/api/downloads/7/{}", action)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("DELETE"))
        .and(path("/api/downloads/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let id = DownloadId::from("7");
    client.pause(&id).await.unwrap();
    client.resume(&id).await.unwrap();
    client.cancel(&id).await.unwrap();
    client.delete(&id).await.unwrap();
}

#[tokio::test]
async fn test_rejection_carries_service_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/downloads/7/pause"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Download is not in progress"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.pause(&"7".into()).await.unwrap_err();

    match err {
        DownloadError::Service { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Download is not in progress");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_error_body_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/downloads/9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.get(&"9".into()).await.unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("Failed to fetch download progress"));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/downloads"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert!(matches!(client.list().await, Err(DownloadError::Decode(_))));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/downloads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client =
        HttpDownloadService::with_timeout(&format!("{}/api", server.uri()), Duration::from_millis(100)).unwrap();
    let err = client.list().await.unwrap_err();
    assert!(matches!(err, DownloadError::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_service() {
    // Nothing listens on port 9 of localhost in a test environment.
    let client = HttpDownloadService::new("http://127.0.0.1:9/api").unwrap();
    let err = client.list().await.unwrap_err();
    assert!(matches!(err, DownloadError::Unreachable(_)), "got {err:?}");
    assert!(!client.ping().await);
}

#[tokio::test]
async fn test_empty_url_rejected_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.create(&NewDownload::new("   ")).await.unwrap_err();
    assert!(matches!(err, DownloadError::Validation(_)));
}
