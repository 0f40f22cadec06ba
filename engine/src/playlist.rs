//! Playlist builder (spec §3 "Playlist state", §4.3). A pure function from
//! store snapshot + configuration to RFC 8216bis playlist text, following
//! the teacher's habit (`hls-vod-lib::playlist`) of keeping playlist
//! rendering as free functions over borrowed data rather than a stateful
//! object.

use chrono::{DateTime, Utc};

use crate::config::SessionConfig;
use crate::store::{SegmentMeta, Snapshot};

const MIN_SEGMENT_DURATION_S: f64 = 0.01;

/// Render the bootstrap playlist: header, target duration, media sequence
/// 0, no segment lines (spec §4.3 "Bootstrap").
pub fn render_bootstrap(config: &SessionConfig) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:6\n");
    out.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        config.target_duration_s
    ));
    out.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n");
    out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    out.push_str("#EXT-X-ALLOW-CACHE:NO\n");
    out.push_str("#EXT-X-DISCONTINUITY-SEQUENCE:0\n");
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out
}

/// Render the live media playlist for the current store snapshot (spec
/// §4.3 "Output contract", "Selection rule").
pub fn render(
    config: &SessionConfig,
    snapshot: &Snapshot,
    path: &str,
    program_date_time_of_first: Option<DateTime<Utc>>,
) -> String {
    let published: Vec<&SegmentMeta> = select_published(&snapshot.segments, config.window_size);

    if published.is_empty() {
        return render_bootstrap(config);
    }

    let version = if snapshot.has_init { 7 } else { 6 };
    let start_seq = published[0].sequence;
    let d = config.segment_duration_s as f64;

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str(&format!("#EXT-X-VERSION:{}\n", version));
    out.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        config.target_duration_s
    ));
    out.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n");
    out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    out.push_str(&format!(
        "#EXT-X-SERVER-CONTROL:CAN-SKIP-UNTIL={}\n",
        format_duration(2.0 * d)
    ));
    out.push_str(&format!(
        "#EXT-X-START:TIME-OFFSET=-{}\n",
        format_duration(2.0 * d)
    ));
    out.push_str("#EXT-X-ALLOW-CACHE:NO\n");
    out.push_str(&format!(
        "#EXT-X-DISCONTINUITY-SEQUENCE:{}\n",
        snapshot.discontinuity_sequence
    ));
    out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", start_seq));

    if snapshot.has_init {
        out.push_str(&format!(
            "#EXT-X-MAP:URI=\"/stream/{}/init.mp4\"\n",
            path
        ));
    }

    if let Some(pdt) = program_date_time_of_first {
        out.push_str(&format!(
            "#EXT-X-PROGRAM-DATE-TIME:{}\n",
            pdt.to_rfc3339()
        ));
    }

    let has_gap = published[0].discontinuity_before;
    if start_seq != 0 && has_gap {
        out.push_str("#EXT-X-DISCONTINUITY\n");
    }

    for seg in &published {
        out.push_str(&format!(
            "#EXTINF:{},\n",
            format_duration(seg.duration.as_f64())
        ));
        out.push_str(&format!(
            "/stream/{}/segments/{}\n",
            path, seg.filename
        ));
    }

    out
}

/// Select the last `min(window, N)` segments, skipping zero-duration
/// entries (spec §4.3 "Selection rule", §8 invariant 4).
fn select_published(segments: &[SegmentMeta], window: usize) -> Vec<&SegmentMeta> {
    let nonzero: Vec<&SegmentMeta> = segments
        .iter()
        .filter(|s| s.duration.as_f64() >= MIN_SEGMENT_DURATION_S)
        .collect();
    let start = nonzero.len().saturating_sub(window);
    nonzero[start..].to_vec()
}

fn format_duration(seconds: f64) -> String {
    format!("{:.3}", seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Rational;
    use std::time::SystemTime;

    fn meta(seq: u64, dur_s: f64, discontinuity_before: bool) -> SegmentMeta {
        SegmentMeta {
            sequence: seq,
            filename: format!("segment_{:03}.m4s", seq),
            created_at: SystemTime::now(),
            duration: Rational::new((dur_s * 1000.0) as i64, 1000),
            size: 100,
            trace_id: "t".to_string(),
            discontinuity_before,
        }
    }

    #[test]
    fn bootstrap_has_no_extinf_and_zero_media_sequence() {
        let cfg = SessionConfig::default();
        let playlist = render_bootstrap(&cfg);
        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(!playlist.contains("#EXTINF"));
        assert!(!playlist.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn render_with_no_segments_falls_back_to_bootstrap() {
        let cfg = SessionConfig::default();
        let snap = Snapshot {
            has_init: false,
            segments: std::sync::Arc::new(vec![]),
            discontinuity_sequence: 0,
        };
        let out = render(&cfg, &snap, "abc", None);
        assert!(out.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(!out.contains("#EXTINF"));
    }

    #[test]
    fn sliding_window_publishes_only_the_last_w_segments() {
        let cfg = SessionConfig {
            window_size: 3,
            ..SessionConfig::default()
        };
        let segs: Vec<SegmentMeta> = (0..10).map(|i| meta(i, 1.0, false)).collect();
        let snap = Snapshot {
            has_init: true,
            segments: std::sync::Arc::new(segs),
            discontinuity_sequence: 0,
        };
        let out = render(&cfg, &snap, "xyz", None);
        assert_eq!(out.matches("#EXTINF").count(), 3);
        assert!(out.contains("#EXT-X-MEDIA-SEQUENCE:7"));
        assert!(out.contains("segment_007.m4s"));
        assert!(out.contains("segment_009.m4s"));
    }

    #[test]
    fn zero_duration_segments_are_never_listed() {
        let cfg = SessionConfig::default();
        let mut segs: Vec<SegmentMeta> = (0..3).map(|i| meta(i, 1.0, false)).collect();
        segs.push(meta(3, 0.0, false));
        let snap = Snapshot {
            has_init: true,
            segments: std::sync::Arc::new(segs),
            discontinuity_sequence: 0,
        };
        let out = render(&cfg, &snap, "xyz", None);
        assert!(!out.contains("segment_003.m4s"));
    }

    #[test]
    fn discontinuity_tag_appears_only_on_a_published_gap() {
        let cfg = SessionConfig {
            window_size: 2,
            ..SessionConfig::default()
        };
        let segs = vec![meta(4, 1.0, true), meta(5, 1.0, false)];
        let snap = Snapshot {
            has_init: true,
            segments: std::sync::Arc::new(segs),
            discontinuity_sequence: 1,
        };
        let out = render(&cfg, &snap, "xyz", None);
        assert!(out.contains("#EXT-X-DISCONTINUITY\n"));
        assert!(out.contains("#EXT-X-DISCONTINUITY-SEQUENCE:1"));
    }

    #[test]
    fn map_uri_present_only_when_init_exists() {
        let cfg = SessionConfig::default();
        let segs = vec![meta(0, 1.0, false)];
        let snap = Snapshot {
            has_init: false,
            segments: std::sync::Arc::new(segs),
            discontinuity_sequence: 0,
        };
        let out = render(&cfg, &snap, "p", None);
        assert!(!out.contains("EXT-X-MAP"));
        assert!(out.contains("#EXT-X-VERSION:6"));
    }
}
