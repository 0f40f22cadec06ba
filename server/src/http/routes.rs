//! Route table (spec §4.4). Static asset passthrough, CORS, and structured
//! request logging follow `hls-vod-server::main`'s router assembly; CORS
//! preflight is handled by `tower_http::cors::CorsLayer` rather than a
//! hand-written `OPTIONS` handler, since the layer already implements
//! exactly the headers spec §4.4 asks for. Client-activity tracking and the
//! `Connection: close` contract (spec §6) are applied as `axum::middleware`
//! layers rather than per-handler, so they cover every route uniformly.

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::clients::ClientTracker;
use crate::host::TracingHostSink;
use hls_origin_engine::Supervisor;

use super::handlers;
use super::middleware::{close_connections, touch_client};

pub type AppSupervisor = Supervisor<TracingHostSink>;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<AppSupervisor>,
    pub clients: Arc<ClientTracker<TracingHostSink>>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::RANGE,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);
    // Request-size cap (spec §4.4, 8 KiB default): this server only ever
    // receives small POST bodies (client-event pings, log lines), so one
    // flat ceiling is plenty; GET responses (segments, playlists) are
    // unaffected, since this limits request bodies, not responses.
    let body_limit = RequestBodyLimitLayer::new(state.supervisor.config().http_buffer_size);

    Router::new()
        .route("/view", get(handlers::view_root))
        .route("/view/{path}", get(handlers::view_page))
        .route("/stream/{path}/playlist.m3u8", get(handlers::playlist))
        .route("/stream/{path}/init.mp4", get(handlers::init_segment))
        .route("/stream/{path}/segments/{name}", get(handlers::media_segment))
        .route("/location", get(handlers::location))
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/css/{*rest}", get(handlers::static_asset))
        .route("/js/{*rest}", get(handlers::static_asset))
        .route("/images/{*rest}", get(handlers::static_asset))
        .route("/client-event", post(handlers::client_event))
        .route("/log", post(handlers::client_log))
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), touch_client))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(body_limit)
        .layer(from_fn(close_connections))
        .with_state(state)
}
