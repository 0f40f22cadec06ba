//! Route handlers (spec §4.4). Each returns explicit `Content-Type` /
//! `Cache-Control` headers alongside the body, following
//! `hls-vod-server::http::handlers`'s `(HeaderMap, Bytes).into_response()`
//! shape rather than relying on axum's content-negotiation extractors.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use hls_origin_engine::{Lookup, PathStatus};
use serde_json::json;

use crate::error::{reject_traversal, ServerError};
use crate::http::routes::AppState;

const VIEWER_TEMPLATE: &str = include_str!("viewer.html");

fn mime_response(body: impl Into<axum::body::Bytes>, content_type: &'static str, cache: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache));
    (headers, body.into()).into_response()
}

/// Segments advertise `Accept-Ranges: bytes` without actually honoring a
/// `Range` request (spec §6): unimplemented range support always falls back
/// to a full-body response, which every HLS client in scope already
/// tolerates.
fn segment_response(body: impl Into<axum::body::Bytes>, content_type: &'static str, cache: &'static str) -> Response {
    let mut response = mime_response(body, content_type, cache);
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
}

fn require_live_path(state: &AppState, path: &str) -> Result<(), ServerError> {
    reject_traversal(path)?;
    match state.supervisor.path_status(path) {
        PathStatus::Current => Ok(()),
        PathStatus::Retired => Err(ServerError::Gone),
        PathStatus::Unknown => Err(ServerError::NotFound),
    }
}

pub async fn view_root(State(state): State<AppState>) -> impl IntoResponse {
    let path = state.supervisor.current_path();
    Redirect::temporary(&format!("/view/{path}"))
}

pub async fn view_page(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ServerError> {
    require_live_path(&state, &path)?;
    let title = &state.supervisor.config().stream_title;
    let body = VIEWER_TEMPLATE
        .replace("{{path}}", &path)
        .replace("{{title}}", title);
    Ok(mime_response(body.into_bytes(), "text/html; charset=utf-8", "no-cache"))
}

pub async fn playlist(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ServerError> {
    require_live_path(&state, &path)?;
    let text = state.supervisor.render_playlist(&path);
    Ok(mime_response(
        text.into_bytes(),
        "application/vnd.apple.mpegurl",
        "no-cache",
    ))
}

pub async fn init_segment(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ServerError> {
    require_live_path(&state, &path)?;
    match state.supervisor.lookup("init.mp4") {
        Lookup::Init(bytes) => Ok(segment_response(bytes, "video/mp4", "max-age=31536000, immutable")),
        _ => Err(ServerError::NotFound),
    }
}

pub async fn media_segment(
    State(state): State<AppState>,
    Path((path, name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    require_live_path(&state, &path)?;
    reject_traversal(&name)?;
    match state.supervisor.lookup(&name) {
        Lookup::Media(bytes, _meta) => Ok(segment_response(bytes, "video/mp4", "no-cache")),
        _ => Err(ServerError::NotFound),
    }
}

/// Delegates to the host's own `request_location()` (spec §4.4, §6), merging
/// whatever it returns over the baseline path/title fields rather than
/// fabricating location data here.
pub async fn location(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = json!({
        "path": state.supervisor.current_path(),
        "stream_title": state.supervisor.config().stream_title,
    });
    if let Some(host_location) = state.supervisor.request_location() {
        if let (Some(body_obj), Some(host_obj)) = (body.as_object_mut(), host_location.as_object()) {
            for (key, value) in host_obj {
                body_obj.insert(key.clone(), value.clone());
            }
        }
    }
    Json(body)
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.supervisor.snapshot();
    Json(json!({
        "path": state.supervisor.current_path(),
        "segments": snapshot.segments.len(),
        "has_init": snapshot.has_init,
        "clients": state.clients.active_count(),
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = format!(
        "<html><body><h1>hls-origin-server</h1>\
         <table>\
         <tr><td>active path</td><td>{}</td></tr>\
         <tr><td>clients</td><td>{}</td></tr>\
         <tr><td>dropped frames</td><td>{}</td></tr>\
         <tr><td>emitted segments</td><td>{}</td></tr>\
         <tr><td>muxer restarts</td><td>{}</td></tr>\
         </table></body></html>",
        state.supervisor.current_path(),
        state.clients.active_count(),
        state.supervisor.dropped_frames(),
        state.supervisor.emitted_segments(),
        state.supervisor.muxer_restarts(),
    );
    mime_response(body.into_bytes(), "text/html; charset=utf-8", "no-cache")
}

pub async fn static_asset() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "static asset not bundled")
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "no such route")
}

pub async fn client_event(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    state.clients.touch(addr);
    StatusCode::NO_CONTENT
}

pub async fn client_log(State(_state): State<AppState>, body: String) -> impl IntoResponse {
    tracing::debug!(%body, "client log");
    StatusCode::NO_CONTENT
}
