use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use fileshare_api::http::{create_router, error::ErrorResponse, upload::UploadResponse, AppState};
use fileshare_core::identity::StaticIdentityProvider;
use fileshare_core::progress::{channel, RegistryConfig};
use fileshare_core::storage::LocalDirStore;
use fileshare_core::{Config, ConnectionRegistry};

const TOKEN: &str = "token-1";

struct TestApp {
    router: axum::Router,
    registry: ConnectionRegistry,
    dir: TempDir,
}

async fn test_app(max_upload_bytes: u64) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.upload_dir = dir.path().display().to_string();
    config.storage.max_upload_bytes = max_upload_bytes;
    config.progress.sampling_interval_ms = 5;
    config.auth.tokens = HashMap::from([(TOKEN.to_string(), "alice".to_string())]);

    let store = LocalDirStore::new(dir.path()).await.unwrap();
    let identity = StaticIdentityProvider::from_config(&config.auth);
    let registry = ConnectionRegistry::new(RegistryConfig::from(&config.progress));
    let state = AppState::new(&config, registry.clone(), Arc::new(store), Arc::new(identity));

    TestApp {
        router: create_router(state),
        registry,
        dir,
    }
}

fn upload_request(uri: &str, body: Vec<u8>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(token) = token {
        builder = builder.header("x-user-token", token);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = test_app(1024).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(Request::get("/health/progress").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: serde_json::Value = read_json(response).await;
    assert_eq!(status["active_channels"], 0);
    assert_eq!(status["sweep_running"], false);
}

#[tokio::test]
async fn upload_without_credential_is_rejected() {
    let app = test_app(1024).await;

    let response = app
        .router
        .oneshot(upload_request("/upload-file", b"hello".to_vec(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.status, 401);
}

#[tokio::test]
async fn upload_with_unknown_credential_is_rejected() {
    let app = test_app(1024).await;

    let response = app
        .router
        .oneshot(upload_request("/upload-file", b"hello".to_vec(), Some("nope")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_is_stored_without_correlation() {
    let app = test_app(1024).await;

    let response = app
        .router
        .oneshot(upload_request("/upload-file?name=notes.txt", b"hello world".to_vec(), Some(TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: UploadResponse = read_json(response).await;
    assert_eq!(uploaded.size, 11);
    assert_eq!(uploaded.message, "Upload successful");

    let stored = tokio::fs::read(app.dir.path().join(&uploaded.id)).await.unwrap();
    assert_eq!(stored, b"hello world");
}

#[tokio::test]
async fn declared_length_over_limit_is_rejected() {
    let app = test_app(8).await;

    let response = app
        .router
        .oneshot(upload_request("/upload-file", vec![0u8; 64], Some(TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn streamed_body_over_limit_is_rejected_and_not_kept() {
    let app = test_app(8).await;

    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![Ok(vec![1u8; 6]), Ok(vec![2u8; 6])];
    let request = Request::builder()
        .method("POST")
        .uri("/upload-file")
        .header("x-user-token", TOKEN)
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let mut entries = tokio::fs::read_dir(app.dir.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn correlated_upload_reports_completion_and_closes_channel() {
    let app = test_app(1024 * 1024).await;
    let (handle, mut receiver) = channel(16);
    app.registry.register("upload-42", handle);

    let response = app
        .router
        .oneshot(upload_request("/upload-file?uploadId=upload-42", vec![7u8; 4096], Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut received = Vec::new();
    while let Some(message) = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .unwrap()
    {
        received.push(message);
    }

    assert_eq!(received.last().map(String::as_str), Some("PERCENTAGE:100"));
    assert!(!app.registry.contains("upload-42"));
}

#[tokio::test]
async fn correlated_upload_without_channel_still_succeeds() {
    let app = test_app(1024).await;

    let response = app
        .router
        .oneshot(upload_request("/upload-file?uploadId=nobody-listening", b"data".to_vec(), Some(TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.registry.is_empty());
}

const BOUNDARY: &str = "----fileshare-test-boundary";

/// Form body shaped like the browser client's: a `file` part and a `comment` field
fn multipart_body(file_name: &str, content: &[u8], comment: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"comment\"\r\n\r\n\
             {comment}\r\n\
             --{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );
    body
}

fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(header::CONTENT_LENGTH, body.len())
        .header("x-user-token", TOKEN)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn multipart_upload_stores_file_part() {
    let app = test_app(1024 * 1024).await;
    let content: Vec<u8> = (0..=255u8).cycle().take(3000).collect();

    let response = app
        .router
        .oneshot(multipart_request(
            "/upload-file",
            multipart_body("holiday.jpg", &content, "from the beach"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: UploadResponse = read_json(response).await;
    assert_eq!(uploaded.size, 3000);
    assert_eq!(uploaded.name.as_deref(), Some("holiday.jpg"));
    assert_eq!(uploaded.comment.as_deref(), Some("from the beach"));

    let stored = tokio::fs::read(app.dir.path().join(&uploaded.id)).await.unwrap();
    assert_eq!(stored, content);
}

#[tokio::test]
async fn correlated_multipart_upload_reports_completion() {
    let app = test_app(1024 * 1024).await;
    let (handle, mut receiver) = channel(16);
    app.registry.register("form-7", handle);

    let response = app
        .router
        .oneshot(multipart_request(
            "/upload-file?uploadId=form-7",
            multipart_body("big.bin", &vec![9u8; 8192], "nightly dump"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: UploadResponse = read_json(response).await;
    assert_eq!(uploaded.size, 8192);

    let mut received = Vec::new();
    while let Some(message) = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .unwrap()
    {
        received.push(message);
    }

    assert_eq!(received.last().map(String::as_str), Some("PERCENTAGE:100"));
    assert!(!app.registry.contains("form-7"));
}

#[tokio::test]
async fn multipart_without_file_part_is_rejected() {
    let app = test_app(1024).await;
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"comment\"\r\n\r\n\
         nothing attached\r\n\
         --{BOUNDARY}--\r\n"
    );

    let response = app
        .router
        .oneshot(multipart_request("/upload-file", body.into_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let mut entries = tokio::fs::read_dir(app.dir.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn multipart_over_limit_is_rejected_and_not_kept() {
    let app = test_app(1024).await;
    let body = multipart_body("too-big.bin", &vec![1u8; 4096], "");
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        body.chunks(512).map(|chunk| Ok(chunk.to_vec())).collect();

    // no Content-Length, so the limit trips mid-stream inside the parser
    let request = Request::builder()
        .method("POST")
        .uri("/upload-file")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header("x-user-token", TOKEN)
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let mut entries = tokio::fs::read_dir(app.dir.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}
