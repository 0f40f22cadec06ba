//! Client activity tracking. Repurposes `hls-vod-server::limits`'s
//! `RwLock<HashMap<SocketAddr, _>>` bucket pattern to track last-seen
//! timestamps instead of rate-limiting tokens (spec §4.4 "client tracking"
//! has no rate limiting; this exists purely to raise connect/disconnect
//! events and size `/health`'s client count).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hls_origin_engine::HostSink;

pub struct ClientTracker<H: HostSink> {
    last_seen: parking_lot::RwLock<HashMap<SocketAddr, Instant>>,
    host: Arc<H>,
    inactivity_timeout: Duration,
}

impl<H: HostSink + 'static> ClientTracker<H> {
    pub fn new(host: Arc<H>, inactivity_timeout: Duration) -> Self {
        Self {
            last_seen: parking_lot::RwLock::new(HashMap::new()),
            host,
            inactivity_timeout,
        }
    }

    /// Record activity from `addr`, raising `client_connected` the first
    /// time it's seen.
    pub fn touch(&self, addr: SocketAddr) {
        let mut guard = self.last_seen.write();
        if guard.insert(addr, Instant::now()).is_none() {
            self.host.client_connected(&addr.to_string());
        }
    }

    pub fn active_count(&self) -> usize {
        self.last_seen.read().len()
    }

    /// Evict clients idle longer than the configured timeout, raising
    /// `client_disconnected` for each (spec §4.4, periodic sweep).
    pub fn sweep(&self) {
        let mut expired = Vec::new();
        {
            let mut guard = self.last_seen.write();
            guard.retain(|addr, last| {
                let alive = last.elapsed() < self.inactivity_timeout;
                if !alive {
                    expired.push(*addr);
                }
                alive
            });
        }
        for addr in expired {
            self.host.client_disconnected(&addr.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_origin_engine::NoopHostSink;

    #[test]
    fn touch_then_sweep_evicts_after_timeout() {
        let tracker = ClientTracker::new(Arc::new(NoopHostSink), Duration::from_millis(1));
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        tracker.touch(addr);
        assert_eq!(tracker.active_count(), 1);
        std::thread::sleep(Duration::from_millis(5));
        tracker.sweep();
        assert_eq!(tracker.active_count(), 0);
    }
}
