//! The host callback surface (spec §6 "Event callbacks to host"), following
//! the "dynamic dispatch via delegate protocol" design note: rather than the
//! engine reaching for a process-wide logger or a concrete UI type, the
//! embedding application hands the engine one object implementing this
//! trait and the engine talks to it exclusively through these six methods.
//!
//! Every method takes `&self` and is expected to return immediately —
//! implementations that need to do real work (write to disk, cross an IPC
//! boundary) should hand off to their own background task rather than block
//! the caller, since these are invoked from hot paths (sample intake,
//! connection accept).

use serde_json::Value;

/// Capabilities the embedding application exposes to the engine.
pub trait HostSink: Send + Sync {
    /// The HTTP origin finished binding and is ready to accept connections.
    fn server_started(&self, base_url: &str) {
        let _ = base_url;
    }

    /// The HTTP origin has fully shut down.
    fn server_stopped(&self) {}

    /// A client opened a connection to a stream endpoint.
    fn client_connected(&self, addr: &str) {
        let _ = addr;
    }

    /// A previously-connected client's connection closed or timed out.
    fn client_disconnected(&self, addr: &str) {
        let _ = addr;
    }

    /// A non-fatal operational error worth surfacing to the host (spec §4.1
    /// "on_error(cb)", escalated after repeated consecutive muxer failures).
    fn error(&self, message: &str) {
        let _ = message;
    }

    /// The host's current location, consulted when a client requests
    /// `/location` (spec §4.4). Returning `None` yields an empty object.
    fn request_location(&self) -> Option<Value> {
        None
    }
}

/// Default sink used when an embedder doesn't care to observe engine
/// lifecycle events: every method is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHostSink;

impl HostSink for NoopHostSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_request_location_is_none() {
        let sink = NoopHostSink;
        assert!(sink.request_location().is_none());
    }

    #[test]
    fn noop_sink_methods_do_not_panic() {
        let sink = NoopHostSink;
        sink.server_started("http://127.0.0.1:8080");
        sink.server_stopped();
        sink.client_connected("127.0.0.1:1234");
        sink.client_disconnected("127.0.0.1:1234");
        sink.error("transient failure");
    }
}
