//! # HLS Origin Engine
//!
//! `hls-origin-engine` turns a live, open-ended flow of encoded video/audio
//! samples into a self-contained HTTP Live Streaming origin: fMP4 segments,
//! a sliding-window media playlist, and a bounded in-memory store, with no
//! dependency on a finished input file.
//!
//! Unlike `hls-vod-lib` (which demuxes and repackages an on-disk file on
//! request), this engine is fed samples directly by a caller that owns an
//! encoder — a camera pipeline, a screen-capture loop, anything that can
//! hand it access units in order. It does not talk HTTP itself; that is the
//! `server` crate's job, built on top of [`supervisor::Supervisor`].
//!
//! ## Usage
//!
//! ```ignore
//! hls_origin_engine::ffmpeg_init::init()?;
//! hls_origin_engine::ffmpeg_init::install_log_filter();
//!
//! let supervisor = Supervisor::new(SessionConfig::default(), Arc::new(NoopHostSink));
//! supervisor.start()?;
//! supervisor.submit_video(sample)?;
//! ```

pub mod config;
pub mod error;
pub mod ffmpeg_init;
pub mod host;
pub mod isobmff;
pub mod muxer;
pub mod playlist;
pub mod sample;
pub mod segmenter;
pub mod store;
pub mod supervisor;
pub mod time;

pub use config::SessionConfig;
pub use error::{EngineError, MuxerError, Result};
pub use host::{HostSink, NoopHostSink};
pub use sample::{DropReason, FormatDescription, MediaKind, Sample};
pub use segmenter::{SegmentEvent, Segmenter, SegmenterDiagnostics};
pub use store::{Lookup, SegmentMeta, Snapshot, Store};
pub use supervisor::{PathStatus, Supervisor};
