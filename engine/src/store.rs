//! Bounded in-memory segment store (spec §3 "Segment store", §4.2).
//!
//! Single writer (the segmenter), many readers (HTTP handlers). Readers get
//! an immutable snapshot so they are never blocked by a write beyond the
//! time it takes to clone a handful of `Arc`s, following the
//! read/write discipline `hls-vod-lib::cache::SegmentCache` uses for its
//! `DashMap`-backed cache — here implemented with `parking_lot::RwLock`
//! instead, because unlike the teacher's random-access VOD cache we must
//! preserve strict sequence ordering and evict only from the front.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::time::Rational;

/// Metadata for one emitted media segment (spec §3 "Segment").
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub sequence: u64,
    pub filename: String,
    pub created_at: SystemTime,
    pub duration: Rational,
    pub size: usize,
    pub trace_id: String,
    /// Set when this segment is the first one published after a
    /// path-regeneration reseed or a forced-rotation gap, so the playlist
    /// builder knows to consider a discontinuity boundary here.
    pub discontinuity_before: bool,
}

struct StoredSegment {
    meta: SegmentMeta,
    bytes: Bytes,
}

struct Inner {
    init: Option<Bytes>,
    media: VecDeque<StoredSegment>,
    total_bytes: usize,
    max_segments: usize,
    discontinuity_sequence: u64,
}

/// An immutable view of the store's media metadata, cheap to clone and safe
/// to hold across a `.await` or a socket write (spec §4.2 "Reads MUST NOT
/// be blocked by writes...").
#[derive(Clone)]
pub struct Snapshot {
    pub has_init: bool,
    pub segments: Arc<Vec<SegmentMeta>>,
    pub discontinuity_sequence: u64,
}

/// The result of a `get` lookup by filename.
pub enum Lookup {
    Init(Bytes),
    Media(Bytes, SegmentMeta),
    NotFound,
}

pub struct Store {
    inner: parking_lot::RwLock<Inner>,
}

impl Store {
    pub fn new(max_segments: usize) -> Self {
        Self {
            inner: parking_lot::RwLock::new(Inner {
                init: None,
                media: VecDeque::new(),
                total_bytes: 0,
                max_segments,
                discontinuity_sequence: 0,
            }),
        }
    }

    /// Set the initialization segment once per session. Subsequent calls
    /// after a real init is set are ignored (spec §4.2 "put_init").
    pub fn put_init(&self, bytes: Bytes) {
        let mut inner = self.inner.write();
        if inner.init.is_none() {
            inner.init = Some(bytes);
        }
    }

    /// True if an init segment is currently set.
    pub fn has_init(&self) -> bool {
        self.inner.read().init.is_some()
    }

    /// Append a media segment, evicting the oldest if the store is full
    /// (spec §4.2 "put_media").
    pub fn put_media(&self, meta: SegmentMeta, bytes: Bytes) {
        let mut inner = self.inner.write();
        let size = bytes.len();
        inner.total_bytes += size;
        inner.media.push_back(StoredSegment { meta, bytes });
        while inner.media.len() > inner.max_segments {
            if let Some(evicted) = inner.media.pop_front() {
                inner.total_bytes -= evicted.meta.size;
            }
        }
    }

    /// Look up a named entry (spec §4.2 "get").
    pub fn get(&self, name: &str) -> Lookup {
        let inner = self.inner.read();
        if name == "init.mp4" {
            return match &inner.init {
                Some(b) => Lookup::Init(b.clone()),
                None => Lookup::NotFound,
            };
        }
        for stored in inner.media.iter() {
            if stored.meta.filename == name {
                return Lookup::Media(stored.bytes.clone(), stored.meta.clone());
            }
        }
        Lookup::NotFound
    }

    /// Take an immutable snapshot of the current store state (spec §4.2
    /// "snapshot").
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            has_init: inner.init.is_some(),
            segments: Arc::new(inner.media.iter().map(|s| s.meta.clone()).collect()),
            discontinuity_sequence: inner.discontinuity_sequence,
        }
    }

    /// Remove all entries (spec §4.2 "clear", used by `stop()` and path
    /// regeneration). Leaves `discontinuity_sequence` untouched: it counts
    /// discontinuities cumulatively since session start (spec §4.3), and
    /// `Supervisor::regenerate_path` calls `record_discontinuity()`
    /// immediately before `clear()` on every rotation — resetting it here
    /// would stomp that increment back to zero on every regeneration.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.init = None;
        inner.media.clear();
        inner.total_bytes = 0;
    }

    /// Drop only the captured init segment, keeping media segments, per the
    /// severe memory-pressure hook (spec §4.5): "also drops the captured
    /// initialization segment (the next emitted init becomes the new
    /// canonical one)".
    pub fn drop_init(&self) {
        self.inner.write().init = None;
    }

    /// Keep only the newest `n` media segments, per the memory-pressure
    /// hook (spec §4.5): "if >3 segments are cached, evicts all but the
    /// newest 3".
    pub fn retain_newest(&self, n: usize) {
        let mut inner = self.inner.write();
        while inner.media.len() > n {
            if let Some(evicted) = inner.media.pop_front() {
                inner.total_bytes -= evicted.meta.size;
            }
        }
    }

    pub fn record_discontinuity(&self) {
        self.inner.write().discontinuity_sequence += 1;
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.read().total_bytes
    }

    pub fn media_count(&self) -> usize {
        self.inner.read().media.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(seq: u64) -> SegmentMeta {
        SegmentMeta {
            sequence: seq,
            filename: format!("segment_{:03}.m4s", seq),
            created_at: SystemTime::now(),
            duration: Rational::new(1, 1),
            size: 10,
            trace_id: "t".to_string(),
            discontinuity_before: false,
        }
    }

    #[test]
    fn init_is_set_once() {
        let store = Store::new(6);
        store.put_init(Bytes::from_static(b"first"));
        store.put_init(Bytes::from_static(b"second"));
        match store.get("init.mp4") {
            Lookup::Init(b) => assert_eq!(b, Bytes::from_static(b"first")),
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn eviction_preserves_contiguity_and_caps_size() {
        let store = Store::new(3);
        for i in 0..5u64 {
            store.put_media(meta(i), Bytes::from(vec![0u8; 10]));
        }
        let snap = store.snapshot();
        assert_eq!(snap.segments.len(), 3);
        let sequences: Vec<u64> = snap.segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
        assert_eq!(store.total_bytes(), 30);
    }

    #[test]
    fn get_missing_returns_not_found() {
        let store = Store::new(3);
        assert!(matches!(store.get("segment_999.m4s"), Lookup::NotFound));
    }

    #[test]
    fn clear_resets_everything() {
        let store = Store::new(3);
        store.put_init(Bytes::from_static(b"x"));
        store.put_media(meta(0), Bytes::from_static(b"y"));
        store.clear();
        assert!(!store.has_init());
        assert_eq!(store.media_count(), 0);
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn clear_preserves_discontinuity_sequence() {
        let store = Store::new(3);
        store.record_discontinuity();
        store.put_media(meta(0), Bytes::from_static(b"y"));
        store.clear();
        assert_eq!(store.snapshot().discontinuity_sequence, 1);
    }

    #[test]
    fn retain_newest_keeps_only_the_tail() {
        let store = Store::new(8);
        for i in 0..8u64 {
            store.put_media(meta(i), Bytes::from(vec![0u8; 5]));
        }
        store.retain_newest(3);
        let snap = store.snapshot();
        let sequences: Vec<u64> = snap.segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![5, 6, 7]);
    }
}
