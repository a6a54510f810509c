//! Integration tests for the RPiTube API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rpitube::config::Config;
use rpitube::discovery::{DiscoveryService, MdnsTransport};
use rpitube::playback::StageCommands;
use rpitube::process::StageCommand;
use rpitube::state::AppState;
use rpitube::{create_app, create_app_with_state};
use rpitube_types::{CastResponse, ErrorResponse, PlaybackState, StatusResponse, VlcInterfaceResponse};
use serde_json::json;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

/// Shell snippets standing in for yt-dlp and VLC.
struct ShellStages {
    fetch: &'static str,
    stream: &'static str,
}

impl StageCommands for ShellStages {
    fn fetch(&self, url: &str, cache_dir: &Path, marker: &Path) -> StageCommand {
        StageCommand::new(
            "/bin/sh",
            [
                "-c".to_string(),
                self.fetch.to_string(),
                "fetch".to_string(),
                cache_dir.to_string_lossy().into_owned(),
                marker.to_string_lossy().into_owned(),
                url.to_string(),
            ],
        )
    }

    fn stream(&self, media: &Path, receiver: IpAddr) -> StageCommand {
        StageCommand::new(
            "/bin/sh",
            [
                "-c".to_string(),
                self.stream.to_string(),
                "stream".to_string(),
                media.to_string_lossy().into_owned(),
                receiver.to_string(),
            ],
        )
    }
}

/// App with a fixed receiver and scripted stages in a scratch directory.
async fn scripted_app(fetch: &'static str, stream: &'static str) -> (Router, AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.receiver_ip = Some("192.168.1.42".parse().unwrap());
    config.cache_dir = dir.path().join("videos");
    config.marker_path = dir.path().join("video_filepath.txt");

    let state = AppState::with_stages(config, Arc::new(ShellStages { fetch, stream }));
    let app = create_app_with_state(state.clone()).await;
    (app, state, dir)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = create_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_starts_stopped() {
    let app = create_app().await;

    let response = app.oneshot(get("/api/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let status: StatusResponse = body_json(response).await;
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.session_id.is_none());
}

#[tokio::test]
async fn test_cast_rejects_non_http_url() {
    let app = create_app().await;

    let response = app
        .oneshot(post_json(
            "/api/cast",
            json!({ "url": "file:///etc/passwd", "receiver": "192.168.1.42" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "Invalid URL");
}

#[tokio::test]
async fn test_cast_rejects_garbage_url() {
    let app = create_app().await;

    let response = app
        .oneshot(post_json(
            "/api/cast",
            json!({ "url": "not a url", "receiver": "192.168.1.42" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cast_without_receiver_is_unavailable() {
    let app = create_app().await;

    let response = app
        .oneshot(post_json(
            "/api/cast",
            json!({ "url": "https://example.com/v" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[cfg(unix)]
#[tokio::test]
async fn test_cast_and_wait_completes() {
    let (app, state, dir) = scripted_app(
        "printf '%s\\n' '/cache/My Video.mkv' > \"$2\"",
        "test \"$1\" = '/cache/My Video.mkv' && test \"$2\" = 192.168.1.42",
    )
    .await;

    let response = app
        .oneshot(post_json(
            "/api/cast?wait=true",
            json!({ "url": "https://example.com/v" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cast: CastResponse = body_json(response).await;
    assert_eq!(cast.status, "completed");
    assert_eq!(cast.receiver, "192.168.1.42".parse::<IpAddr>().unwrap());
    assert_eq!(state.orchestrator().state(), PlaybackState::Stopped);
    assert!(!dir.path().join("video_filepath.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cast_and_wait_reports_download_failure() {
    let (app, _state, _dir) = scripted_app("echo 'ERROR: Unsupported URL' >&2; exit 1", "exit 0").await;

    let response = app
        .oneshot(post_json(
            "/api/cast?wait=true",
            json!({ "url": "https://example.com/v" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.details.as_deref(), Some("download_failed"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cast_is_accepted_then_stopped() {
    let (app, state, _dir) = scripted_app("sleep 30", "exit 0").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/cast",
            json!({ "url": "https://example.com/v" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let cast: CastResponse = body_json(response).await;
    assert_eq!(cast.status, "accepted");

    // Wait for the background session to start downloading
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while state.orchestrator().state() != PlaybackState::Downloading {
        assert!(tokio::time::Instant::now() < deadline, "download never started");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let response = app
        .oneshot(Request::builder().uri("/api/stop").method("POST").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let status: StatusResponse = body_json(response).await;
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.session_id.is_none());
}

#[tokio::test]
async fn test_stop_when_idle() {
    let app = create_app().await;

    let response = app
        .oneshot(Request::builder().uri("/api/stop").method("POST").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_vlc_interface_address() {
    let app = create_app().await;

    let response = app.oneshot(get("/api/vlc")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let vlc: VlcInterfaceResponse = body_json(response).await;
    assert!(vlc.address.starts_with("http://"));
    assert!(vlc.address.ends_with(":8080"));
}

#[tokio::test]
async fn test_devices_rejects_zero_timeout() {
    let app = create_app().await;

    let response = app.oneshot(get("/api/devices?timeout_ms=0")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_devices_without_multicast_is_unavailable() {
    let discovery = DiscoveryService::with_transport(Duration::from_secs(1), || {
        Err::<Box<dyn MdnsTransport>, _>(io::Error::new(
            io::ErrorKind::AddrInUse,
            "port 5353 is taken",
        ))
    });
    let stages = Arc::new(ShellStages {
        fetch: "exit 0",
        stream: "exit 0",
    });
    let state = AppState::with_parts(Config::default(), stages, discovery);
    let app = create_app_with_state(state).await;

    let response = app
        .oneshot(get("/api/devices?timeout_ms=500"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "Discovery unavailable");
    assert!(error.details.unwrap().contains("port 5353 is taken"));
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_app().await;

    let response = app.oneshot(get("/api-docs/openapi.json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc: serde_json::Value = body_json(response).await;
    assert!(doc["paths"]["/api/cast"].is_object());
}
