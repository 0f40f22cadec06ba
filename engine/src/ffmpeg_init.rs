//! FFmpeg library initialization and log filtering. Ported from
//! `hls-vod-lib::ffmpeg_utils::{init, install_log_filter}`; the engine's
//! `empty_moov` fragmenting muxer (see [`crate::muxer`]) triggers the same
//! benign FFmpeg warnings the teacher already knew to suppress.

use ffmpeg_next as ffmpeg;

use crate::error::EngineError;

/// Initialize the FFmpeg library. Call exactly once at process startup,
/// before any [`crate::muxer::Fmp4Muxer`] is constructed.
pub fn init() -> Result<(), EngineError> {
    ffmpeg::init().map_err(|e| EngineError::Internal(format!("ffmpeg::init() failed: {e}")))?;
    tracing::info!("FFmpeg initialized");
    Ok(())
}

/// Install a log callback that drops the handful of warnings FFmpeg emits
/// as an expected side effect of `empty_moov` fragmenting without
/// `delay_moov`. Must be called after `init()` and before any segmenter
/// thread starts, since altering the global log callback is not
/// thread-safe.
pub fn install_log_filter() {
    // SAFETY: both calls mutate global FFmpeg state; the caller contract
    // above (after init, before any segmenter starts) makes this safe.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
        ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

const SUPPRESSED_MESSAGES: &[&str] = &[
    "No meaningful edit list will be written when using empty_moov without delay_moov",
    "starts with a nonzero dts",
    "Set the delay_moov flag to handle this case",
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0i8; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    for suppressed in SUPPRESSED_MESSAGES {
        if msg.contains(suppressed) {
            return;
        }
    }

    tracing::warn!(target: "ffmpeg", "{}", msg.trim_end());
}
