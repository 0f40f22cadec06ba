//! `Supervisor` owns the `Store` and the running `Segmenter`, applying the
//! one-way ownership design note: the segmenter only ever emits through a
//! callback, it never reaches back into the HTTP layer or holds a reference
//! to anything that outlives it, and HTTP handlers only ever get read-only
//! access to the `Store`/playlist builder through the `Supervisor`. This
//! replaces the teacher's (`hls-vod-server::AppState` + delegate) cyclic
//! ownership with a single owner sitting above both sides.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::host::HostSink;
use crate::playlist;
use crate::sample::{DropReason, Sample};
use crate::segmenter::{SegmentCallback, SegmentEvent, Segmenter, SegmenterDiagnostics};
use crate::store::{Lookup, Snapshot, Store};
use crate::time::{random_path, unix_seconds};

/// Grace period during which the previous random path keeps resolving
/// after `regenerate_path()`, so in-flight requests issued just before
/// rotation don't 404 (spec §4.6 "5-second grace period").
const PATH_GRACE_PERIOD: Duration = Duration::from_secs(5);

struct PathState {
    current: String,
    previous: Option<(String, Instant)>,
}

/// The result of classifying a requested path against the session's
/// current/previous path state (spec §4.4, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Live path, or previous path still inside its grace period.
    Current,
    /// Previous path, grace period elapsed: 410 Gone.
    Retired,
    /// Never a valid path for this session: 404 Not Found.
    Unknown,
}

/// Owns everything needed to serve one live session: the segment store, the
/// running segmenter, and the randomized URL path. Constructed once per
/// session by the embedding `server` binary/library and handed to the HTTP
/// router as shared, read-mostly state.
pub struct Supervisor<H: HostSink> {
    config: SessionConfig,
    store: Arc<Store>,
    segmenter: parking_lot::Mutex<Option<Segmenter>>,
    path: parking_lot::RwLock<PathState>,
    host: Arc<H>,
    sequence_counter: AtomicU64,
}

impl<H: HostSink + 'static> Supervisor<H> {
    pub fn new(config: SessionConfig, host: Arc<H>) -> Self {
        let store = Arc::new(Store::new(config.max_segments));
        let initial_path = random_path(config.random_path_length);
        Self {
            config,
            store,
            segmenter: parking_lot::Mutex::new(None),
            path: parking_lot::RwLock::new(PathState {
                current: initial_path,
                previous: None,
            }),
            host,
            sequence_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The path currently accepting requests.
    pub fn current_path(&self) -> String {
        self.path.read().current.clone()
    }

    /// True if `candidate` is either the live path or still within the
    /// grace period of the previously-live path (spec §4.6).
    pub fn path_is_valid(&self, candidate: &str) -> bool {
        matches!(self.path_status(candidate), PathStatus::Current)
    }

    /// Classify `candidate` against the live and previous path, so callers
    /// can distinguish "never existed" (404) from "used to resolve, now
    /// retired" (410) (spec §4.4 "requests matching the old retained random
    /// path return 410 Gone").
    pub fn path_status(&self, candidate: &str) -> PathStatus {
        let guard = self.path.read();
        if guard.current == candidate {
            return PathStatus::Current;
        }
        if let Some((prev, regenerated_at)) = &guard.previous {
            if prev == candidate {
                return if regenerated_at.elapsed() < PATH_GRACE_PERIOD {
                    PathStatus::Current
                } else {
                    PathStatus::Retired
                };
            }
        }
        PathStatus::Unknown
    }

    /// Start the segmenter, wiring its emissions straight into the store
    /// (spec §4.1 "on_segment(cb)").
    pub fn start(&self) -> Result<(), EngineError> {
        let mut guard = self.segmenter.lock();
        if guard.is_some() {
            return Ok(());
        }

        let store = self.store.clone();
        let on_segment: SegmentCallback = Box::new(move |event| match event {
            SegmentEvent::Init(bytes) => {
                store.put_init(bytes);
            }
            SegmentEvent::Media { meta, bytes } => {
                store.put_media(meta, bytes);
            }
        });

        let error_host = self.host.clone();
        let on_error: crate::segmenter::ErrorCallback = Box::new(move |message| {
            error_host.error(&message);
        });

        let start_sequence = self.sequence_counter.load(Ordering::Acquire);
        let segmenter = Segmenter::start(self.config.clone(), start_sequence, on_segment, on_error)?;
        *guard = Some(segmenter);
        Ok(())
    }

    /// Stop the segmenter and clear the store (spec §4.5 "stop" lifecycle).
    pub async fn stop(&self) {
        let taken = self.segmenter.lock().take();
        if let Some(mut segmenter) = taken {
            segmenter.stop().await;
        }
        self.store.clear();
        self.host.server_stopped();
    }

    pub fn submit_video(&self, sample: Sample) -> Result<(), DropReason> {
        match self.segmenter.lock().as_ref() {
            Some(s) => s.submit_video(sample),
            None => Err(DropReason::NotRunning),
        }
    }

    pub fn submit_audio(&self, sample: Sample) -> Result<(), DropReason> {
        match self.segmenter.lock().as_ref() {
            Some(s) => s.submit_audio(sample),
            None => Err(DropReason::NotRunning),
        }
    }

    /// Diagnostics snapshot for `/health` (spec §5, §4.4 "GET /health").
    pub fn dropped_frames(&self) -> u64 {
        self.with_diagnostics(|d| d.dropped_frames.load(Ordering::Relaxed))
    }

    pub fn emitted_segments(&self) -> u64 {
        self.with_diagnostics(|d| d.emitted_segments.load(Ordering::Relaxed))
    }

    pub fn muxer_restarts(&self) -> u64 {
        self.with_diagnostics(|d| d.muxer_restarts.load(Ordering::Relaxed))
    }

    fn with_diagnostics<T: Default>(&self, f: impl FnOnce(&SegmenterDiagnostics) -> T) -> T {
        match self.segmenter.lock().as_ref() {
            Some(s) => f(s.diagnostics()),
            None => T::default(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn lookup(&self, name: &str) -> Lookup {
        self.store.get(name)
    }

    pub fn render_playlist(&self, path: &str) -> String {
        let snapshot = self.store.snapshot();
        playlist::render(&self.config, &snapshot, path, None)
    }

    /// Forward to the host's own notion of its location, for `/location`
    /// (spec §4.4, §6 "delegates to host for /location"). `Supervisor` has
    /// no location of its own; this exists purely so the HTTP layer never
    /// needs direct access to the private `host` field.
    pub fn request_location(&self) -> Option<serde_json::Value> {
        self.host.request_location()
    }

    /// Apply the memory-pressure hook (spec §4.5): under moderate pressure,
    /// retain only the newest 3 segments; under severe pressure, also drop
    /// the captured init segment so the next one becomes canonical.
    pub fn apply_memory_pressure(&self, severe: bool) {
        if self.store.media_count() > 3 {
            self.store.retain_newest(3);
        }
        if severe {
            self.store.drop_init();
        }
    }

    /// The full path-regeneration sequence (spec §4.6):
    /// 1. generate a new random path,
    /// 2. keep the old path resolving for a grace period,
    /// 3. reseed the sequence counter from the wall clock so restarts never
    ///    reuse a filename a client might still have cached,
    /// 4. clear the store's media (old segments don't belong under the new
    ///    path) but keep serving the init segment under both paths until the
    ///    new session's own init lands,
    /// 5. record a discontinuity so players that do hold both playlists see
    ///    a clean boundary,
    /// 6. stop then restart the segmenter under the reseeded sequence,
    /// 7. notify the host of the new base URL,
    /// 8. let the grace period lapse naturally (no timer to cancel; the
    ///    `previous` field above is simply ignored once `elapsed()` exceeds
    ///    it).
    pub async fn regenerate_path(&self, base_url_template: impl Fn(&str) -> String) -> String {
        let new_path = random_path(self.config.random_path_length);

        {
            let mut guard = self.path.write();
            let old = std::mem::replace(&mut guard.current, new_path.clone());
            guard.previous = Some((old, Instant::now()));
        }

        let reseeded = (unix_seconds() / 100) % 1000;
        self.sequence_counter.store(reseeded, Ordering::Release);

        self.store.record_discontinuity();
        let taken = self.segmenter.lock().take();
        if let Some(mut segmenter) = taken {
            segmenter.stop().await;
        }
        self.store.clear();

        if let Err(e) = self.start() {
            self.host.error(&format!("failed to restart segmenter after path regeneration: {e}"));
        }

        let url = base_url_template(&new_path);
        self.host.server_started(&url);
        new_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoopHostSink;

    fn supervisor() -> Supervisor<NoopHostSink> {
        Supervisor::new(SessionConfig::default(), Arc::new(NoopHostSink))
    }

    #[test]
    fn path_is_valid_for_current_path_only_before_regeneration() {
        let sup = supervisor();
        let current = sup.current_path();
        assert!(sup.path_is_valid(&current));
        assert!(!sup.path_is_valid("not-the-path"));
    }

    #[tokio::test]
    async fn submit_without_start_is_not_running() {
        let sup = supervisor();
        let sample = crate::sample::Sample {
            kind: crate::sample::MediaKind::Video,
            pts: crate::time::Rational::new(0, 30),
            dts: crate::time::Rational::new(0, 30),
            duration: None,
            keyframe: true,
            payload: Bytes::new(),
            format: None,
        };
        assert_eq!(sup.submit_video(sample), Err(DropReason::NotRunning));
    }

    #[tokio::test]
    async fn regenerate_path_changes_current_and_keeps_old_valid_briefly() {
        let sup = supervisor();
        let old = sup.current_path();
        let new_path = sup.regenerate_path(|p| format!("http://127.0.0.1:8080/view/{p}")).await;
        assert_ne!(old, new_path);
        assert!(sup.path_is_valid(&old));
        assert!(sup.path_is_valid(&new_path));
        sup.stop().await;
    }
}
