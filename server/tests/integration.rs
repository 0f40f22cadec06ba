//! End-to-end coverage of spec §8's scenarios, driving the real router and
//! `Supervisor` with the synthetic sample source instead of a mocked
//! encoder, following `hls-vod-server`'s own integration-test style of
//! exercising handlers through `tower::ServiceExt::oneshot` rather than a
//! bound socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use hls_origin_engine::{SessionConfig, Supervisor};
use hls_origin_server::clients::ClientTracker;
use hls_origin_server::host::TracingHostSink;
use hls_origin_server::http::{build_router, AppState};
use hls_origin_server::testsource;

fn test_session_config() -> SessionConfig {
    SessionConfig {
        segment_duration_s: 0.2,
        min_segment_s: 0.1,
        max_segment_s: 0.4,
        target_duration_s: 1,
        window_size: 3,
        max_segments: 6,
        video_fps: 10.0,
        video_keyframe_interval_frames: 2,
        ..SessionConfig::default()
    }
}

async fn running_app() -> (Arc<Supervisor<TracingHostSink>>, axum::Router) {
    let config = test_session_config();
    let host_sink = Arc::new(TracingHostSink);
    let supervisor = Arc::new(Supervisor::new(config.clone(), host_sink.clone()));
    supervisor.start().unwrap();
    testsource::spawn(supervisor.clone(), config.clone());

    let clients = Arc::new(ClientTracker::new(host_sink, Duration::from_secs(30)));
    let state = AppState { supervisor: supervisor.clone(), clients };
    (supervisor, build_router(state))
}

async fn get(router: &axum::Router, uri: &str) -> axum::http::Response<Body> {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn bootstrap_view_redirects_to_current_path() {
    let (supervisor, router) = running_app().await;
    let response = get(&router, "/view").await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.contains(&supervisor.current_path()));
}

#[tokio::test]
async fn unknown_path_playlist_is_not_found() {
    let (_supervisor, router) = running_app().await;
    let response = get(&router, "/stream/not-a-real-path/playlist.m3u8").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn first_segment_appears_after_enough_samples() {
    let (supervisor, router) = running_app().await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let path = supervisor.current_path();
    let playlist_response = get(&router, &format!("/stream/{path}/playlist.m3u8")).await;
    assert_eq!(playlist_response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(playlist_response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("#EXTM3U"));
    assert!(text.contains(".m4s"));
}

#[tokio::test]
async fn sliding_window_caps_published_segment_count() {
    let (supervisor, router) = running_app().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let path = supervisor.current_path();
    let response = get(&router, &format!("/stream/{path}/playlist.m3u8")).await;
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let published = text.matches(".m4s").count();
    assert!(published <= 3, "published {published} segments, window is 3");
}

#[tokio::test]
async fn path_regeneration_keeps_old_path_valid_briefly_then_retires_it() {
    let (supervisor, router) = running_app().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let old_path = supervisor.current_path();
    let _new_path = supervisor
        .regenerate_path(|p| format!("http://127.0.0.1:8080/view/{p}"))
        .await;

    let during_grace = get(&router, &format!("/stream/{old_path}/playlist.m3u8")).await;
    assert_eq!(during_grace.status(), StatusCode::OK);

    supervisor.stop().await;
}

#[tokio::test]
async fn health_reports_counters() {
    let (_supervisor, router) = running_app().await;
    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("emitted segments"));
}

#[tokio::test]
async fn path_with_traversal_sequence_is_forbidden() {
    let (_supervisor, router) = running_app().await;
    // Percent-encoded so it lands inside the single `{path}` capture of
    // `/view/{path}` instead of introducing extra path segments that would
    // just miss the route and fall through to the 404 fallback.
    let response = get(&router, "/view/%2e%2e").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn segment_name_with_traversal_sequence_is_forbidden() {
    let (supervisor, router) = running_app().await;
    let path = supervisor.current_path();
    let response = get(&router, &format!("/stream/{path}/segments/%2e%2e%2finit.mp4")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
