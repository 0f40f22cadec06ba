//! Session configuration (spec §3 "Session configuration", §6 "Configuration
//! knobs"). Fixed for the lifetime of a session; changing any field requires
//! a session restart, following `hls-vod-server::config::ServerConfig`'s
//! plain-struct-plus-`Default` shape.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Target segment duration in seconds (D).
    pub segment_duration_s: f32,
    /// Minimum segment duration (D_min).
    pub min_segment_s: f32,
    /// Maximum segment duration, forces rotation regardless of keyframe (D_max).
    pub max_segment_s: f32,
    /// Playlist EXT-X-TARGETDURATION, integer seconds, >= ceil(max_segment_s).
    pub target_duration_s: u32,
    /// Sliding window size published in the playlist (W).
    pub window_size: usize,
    /// Maximum retained segments in the store (M >= W).
    pub max_segments: usize,

    pub video_width: u32,
    pub video_height: u32,
    pub video_bitrate: u64,
    pub video_fps: f32,
    pub video_keyframe_interval_frames: u32,
    pub video_keyframe_interval_s: f32,
    pub video_quality: u8,

    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bitrate: u64,

    pub http_port: u16,
    pub http_buffer_size: usize,
    pub client_inactivity_timeout_s: u64,
    pub random_path_length: usize,
    pub stream_title: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            segment_duration_s: 1.0,
            min_segment_s: 0.5,
            max_segment_s: 2.0,
            target_duration_s: 2,
            window_size: 3,
            max_segments: 6,

            video_width: 1280,
            video_height: 720,
            video_bitrate: 2_500_000,
            video_fps: 30.0,
            video_keyframe_interval_frames: 30,
            video_keyframe_interval_s: 1.0,
            video_quality: 23,

            audio_sample_rate: 44_100,
            audio_channels: 1,
            audio_bitrate: 64_000,

            http_port: 8080,
            http_buffer_size: 8 * 1024,
            client_inactivity_timeout_s: 30,
            random_path_length: 10,
            stream_title: "Live".to_string(),
        }
    }
}

impl SessionConfig {
    /// Validate the knob combination, surfaced synchronously from `start`
    /// (spec §7 "ConfigurationError").
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_size == 0 {
            return Err(EngineError::Configuration(
                "window_size must be >= 1".to_string(),
            ));
        }
        if self.window_size > self.max_segments {
            return Err(EngineError::Configuration(format!(
                "window_size ({}) must be <= max_segments ({})",
                self.window_size, self.max_segments
            )));
        }
        if self.min_segment_s <= 0.0 || self.max_segment_s <= 0.0 {
            return Err(EngineError::Configuration(
                "segment durations must be positive".to_string(),
            ));
        }
        if self.min_segment_s > self.segment_duration_s
            || self.segment_duration_s > self.max_segment_s
        {
            return Err(EngineError::Configuration(format!(
                "segment_duration_s ({}) must lie within [min_segment_s ({}), max_segment_s ({})]",
                self.segment_duration_s, self.min_segment_s, self.max_segment_s
            )));
        }
        if (self.target_duration_s as f32) < self.max_segment_s.ceil() {
            return Err(EngineError::Configuration(format!(
                "target_duration_s ({}) must be >= ceil(max_segment_s) ({})",
                self.target_duration_s,
                self.max_segment_s.ceil()
            )));
        }
        if self.random_path_length == 0 {
            return Err(EngineError::Configuration(
                "random_path_length must be >= 1".to_string(),
            ));
        }
        if self.http_buffer_size == 0 {
            return Err(EngineError::Configuration(
                "http_buffer_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn window_larger_than_max_segments_is_rejected() {
        let cfg = SessionConfig {
            window_size: 10,
            max_segments: 6,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn target_duration_below_max_segment_is_rejected() {
        let cfg = SessionConfig {
            max_segment_s: 5.0,
            target_duration_s: 2,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn segment_duration_outside_bounds_is_rejected() {
        let cfg = SessionConfig {
            segment_duration_s: 10.0,
            min_segment_s: 0.5,
            max_segment_s: 2.0,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
