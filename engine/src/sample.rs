//! The sample data model (spec §3 "Sample").

use bytes::Bytes;

use crate::time::Rational;

/// Which media kind a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codec configuration carried on the first sample of a session per kind
/// (spec §3: "only first sample per session needs to carry full
/// parameters"). The segmenter requires this to be byte-for-byte identical
/// across muxer restarts within a session (spec §4.1 "Initialization
/// segment reuse").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatDescription {
    Avc {
        /// Raw SPS NAL payload (no start code).
        sps: Bytes,
        /// Raw PPS NAL payload (no start code).
        pps: Bytes,
        profile: u8,
        level: u8,
    },
    Hevc {
        vps: Bytes,
        sps: Bytes,
        pps: Bytes,
    },
    Aac {
        sample_rate: u32,
        channels: u16,
        /// Raw AudioSpecificConfig bytes.
        asc: Bytes,
    },
}

impl FormatDescription {
    pub fn kind(&self) -> MediaKind {
        match self {
            FormatDescription::Avc { .. } | FormatDescription::Hevc { .. } => MediaKind::Video,
            FormatDescription::Aac { .. } => MediaKind::Audio,
        }
    }
}

/// One encoded access unit (spec §3 "Sample").
#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: MediaKind,
    /// Presentation timestamp, monotonic within `kind` after session start.
    pub pts: Rational,
    /// Decode timestamp. Equal to `pts` for audio and for video without B-frames.
    pub dts: Rational,
    pub duration: Option<Rational>,
    /// Only meaningful for video; an IDR / sync sample.
    pub keyframe: bool,
    pub payload: Bytes,
    /// Present only on the first sample of a session for this kind.
    pub format: Option<FormatDescription>,
}

impl Sample {
    pub fn is_valid_successor_of(&self, previous: &Sample) -> bool {
        self.kind == previous.kind && self.pts >= previous.pts
    }
}

/// Why a submitted sample was not queued (spec §4.1 "submit_video /
/// submit_audio ... return a drop reason or 'queued'").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The segmenter is not running (before `start` or after `stop`/`Finishing`).
    NotRunning,
    /// The internal bounded queue is full; the segmenter cannot keep up.
    QueueFull,
    /// The sample's timestamp regressed relative to the previous sample of
    /// the same kind.
    NonMonotonicTimestamp,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::NotRunning => "not running",
            DropReason::QueueFull => "queue full",
            DropReason::NonMonotonicTimestamp => "non-monotonic timestamp",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pts: i64, kind: MediaKind) -> Sample {
        Sample {
            kind,
            pts: Rational::new(pts, 30),
            dts: Rational::new(pts, 30),
            duration: None,
            keyframe: false,
            payload: Bytes::new(),
            format: None,
        }
    }

    #[test]
    fn successor_requires_same_kind_and_non_decreasing_pts() {
        let a = sample(0, MediaKind::Video);
        let b = sample(1, MediaKind::Video);
        assert!(b.is_valid_successor_of(&a));

        let c = sample(0, MediaKind::Video);
        assert!(c.is_valid_successor_of(&a));

        let audio = sample(5, MediaKind::Audio);
        assert!(!audio.is_valid_successor_of(&a));
    }
}
