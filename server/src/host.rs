//! The `server` binary's `HostSink`: forwards lifecycle events to `tracing`
//! instead of holding them for an embedding application to poll, matching
//! the teacher's `main.rs` choice to make the binary itself the observer of
//! last resort.

use hls_origin_engine::HostSink;
use serde_json::{json, Value};

#[derive(Debug, Default)]
pub struct TracingHostSink;

impl HostSink for TracingHostSink {
    fn server_started(&self, base_url: &str) {
        tracing::info!(base_url, "session started");
    }

    fn server_stopped(&self) {
        tracing::info!("session stopped");
    }

    fn client_connected(&self, addr: &str) {
        tracing::debug!(addr, "client connected");
    }

    fn client_disconnected(&self, addr: &str) {
        tracing::debug!(addr, "client disconnected");
    }

    fn error(&self, message: &str) {
        tracing::warn!(message, "engine reported an error");
    }

    fn request_location(&self) -> Option<Value> {
        Some(json!({ "available": false }))
    }
}
