//! Cross-cutting request/response middleware, following
//! `hls-vod-server::http::middleware`'s `Next`-based hooks.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

use super::routes::AppState;

/// Touches the client tracker on every request that carries connection
/// info, not just the auxiliary `/client-event` ping, so real player
/// traffic (playlist/segment/view GETs) keeps the inactivity sweep and
/// `client_connected` event honest (spec §4.4: "each request updates the
/// per-address last-activity timestamp"). `ConnectInfo` is only present
/// when the server was bound with `into_make_service_with_connect_info`;
/// callers exercising the router directly (e.g. `oneshot` in tests) simply
/// skip the touch.
pub async fn touch_client(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ConnectInfo(addr)) = connect_info {
        state.clients.touch(addr);
    }
    next.run(request).await
}

/// Marks every response `Connection: close` (spec §6: "exactly one request
/// is served per connection; the socket is shut down... and closed").
/// hyper's HTTP/1.1 connection handling honors this response header by
/// closing the connection after writing it, so this needs no lower-level
/// server builder than `axum::serve`.
pub async fn close_connections(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
