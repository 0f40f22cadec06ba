//! A synthetic sample generator standing in for the real encoder this
//! engine is designed to sit behind. Produces a steady cadence of AVC video
//! and AAC audio `Sample`s on a `tokio::time::interval`, with a keyframe
//! every `video_keyframe_interval_frames` frames, so the demo binary and the
//! integration tests have something to drive the segmenter with. Not a
//! functioning encoder: the payload bytes are fixed placeholders, not a real
//! bitstream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hls_origin_engine::time::Rational;
use hls_origin_engine::{FormatDescription, HostSink, MediaKind, Sample, SessionConfig, Supervisor};

/// Spawn the generator as a background task, submitting samples into
/// `supervisor` until the returned handle is aborted or dropped.
pub fn spawn<H: HostSink + 'static>(
    supervisor: Arc<Supervisor<H>>,
    config: SessionConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { run(supervisor, config).await })
}

async fn run<H: HostSink + 'static>(supervisor: Arc<Supervisor<H>>, config: SessionConfig) {
    let fps = config.video_fps.max(1.0);
    let frame_period = Duration::from_secs_f64(1.0 / fps as f64);
    let video_timebase = 90_000i64;
    let audio_timebase = config.audio_sample_rate as i64;
    let samples_per_frame = (config.audio_sample_rate as f64 / fps as f64).round() as i64;

    let mut video_ticker = tokio::time::interval(frame_period);
    video_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut frame_index: u64 = 0;
    let mut video_pts: i64 = 0;
    let mut audio_pts: i64 = 0;
    let mut sent_video_format = false;
    let mut sent_audio_format = false;

    loop {
        video_ticker.tick().await;

        let keyframe = frame_index % config.video_keyframe_interval_frames as u64 == 0;
        let video_format = if !sent_video_format {
            sent_video_format = true;
            Some(FormatDescription::Avc {
                sps: Bytes::from_static(&[0x67, 0x42, 0x00, 0x1f]),
                pps: Bytes::from_static(&[0x68, 0xce, 0x3c, 0x80]),
                profile: 0x42,
                level: 0x1f,
            })
        } else {
            None
        };
        let video_sample = Sample {
            kind: MediaKind::Video,
            pts: Rational::new(video_pts, video_timebase),
            dts: Rational::new(video_pts, video_timebase),
            duration: Some(Rational::new((video_timebase as f64 / fps as f64) as i64, video_timebase)),
            keyframe,
            payload: placeholder_video_payload(keyframe),
            format: video_format,
        };
        let _ = supervisor.submit_video(video_sample);

        let audio_format = if !sent_audio_format {
            sent_audio_format = true;
            Some(FormatDescription::Aac {
                sample_rate: config.audio_sample_rate,
                channels: config.audio_channels,
                asc: Bytes::from_static(&[0x11, 0x90]),
            })
        } else {
            None
        };
        let audio_sample = Sample {
            kind: MediaKind::Audio,
            pts: Rational::new(audio_pts, audio_timebase),
            dts: Rational::new(audio_pts, audio_timebase),
            duration: Some(Rational::new(samples_per_frame, audio_timebase)),
            keyframe: true,
            payload: Bytes::from_static(&[0x21, 0x00, 0x04, 0x7f]),
            format: audio_format,
        };
        let _ = supervisor.submit_audio(audio_sample);

        frame_index += 1;
        video_pts += (video_timebase as f64 / fps as f64) as i64;
        audio_pts += samples_per_frame;
    }
}

fn placeholder_video_payload(keyframe: bool) -> Bytes {
    if keyframe {
        Bytes::from_static(&[0x00, 0x00, 0x00, 0x10, 0x65, 0xaa, 0xbb, 0xcc])
    } else {
        Bytes::from_static(&[0x00, 0x00, 0x00, 0x08, 0x41, 0xaa])
    }
}
