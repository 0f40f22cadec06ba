//! In-memory fMP4 muxer: the segmenter's replaceable collaborator (spec §5
//! "Muxer collaborator contract"). Ported from
//! `hls-vod-lib::segment::muxer::Fmp4Muxer` and the root crate's
//! `ffmpeg::io::{MemoryWriter, create_memory_io}`, adapted so stream
//! parameters are *constructed* from a `FormatDescription` rather than
//! cloned from an already-demuxed input stream — unlike a VOD repackager,
//! the engine never has an input container to clone from, only a capability
//! description carried on the first sample of a session.

use std::collections::HashMap;
use std::ffi::c_void;
use std::io::{Seek, SeekFrom, Write};
use std::ptr;
use std::rc::Rc;

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use crate::error::MuxerError;
use crate::isobmff::fix_trex_durations;
use crate::sample::{FormatDescription, MediaKind, Sample};
use crate::time::Rational;

/// Custom IO context that writes to an in-memory buffer instead of a file.
///
/// Single-threaded use only: one instance per muxer, never shared across
/// threads. A plain `Vec<u8>` avoids the `Arc<Mutex<Vec>>` re-entrancy
/// deadlock — FFmpeg can call `seek_packet` from within `write_packet` (e.g.
/// during `write_trailer` to query the buffer size), and `std::sync::Mutex`
/// is not reentrant.
struct MemoryWriter {
    buffer: Vec<u8>,
    position: u64,
}

impl MemoryWriter {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            position: 0,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        self.position = 0;
        std::mem::take(&mut self.buffer)
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let pos = self.position as usize;
        let end = pos + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[pos..end].copy_from_slice(buf);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let buffer_len = self.buffer.len() as u64;
        let new_pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(p) => (self.position as i64 + p) as u64,
            SeekFrom::End(p) => (buffer_len as i64 + p) as u64,
        };
        self.position = new_pos;
        Ok(self.position)
    }
}

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: i32) -> i32 {
    let writer = &mut *(opaque as *mut MemoryWriter);
    let slice = std::slice::from_raw_parts(buf, buf_size as usize);
    match writer.write(slice) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

unsafe extern "C" fn seek_packet(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let writer = &mut *(opaque as *mut MemoryWriter);
    // AVSEEK_SIZE
    if whence == 0x10000 {
        return writer.buffer.len() as i64;
    }
    let seek_from = match whence {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match writer.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

fn create_memory_io() -> Result<(ffmpeg::format::context::Output, Box<MemoryWriter>), MuxerError> {
    // SAFETY: every pointer handed to FFmpeg below is either just allocated
    // by us and checked for null, or (`writer_ptr`) kept alive in the `Box`
    // we return to the caller for the lifetime of the muxer.
    unsafe {
        let writer = Box::new(MemoryWriter::new());
        let writer_ptr = Box::into_raw(writer);

        let buffer_size = 4096usize;
        let buffer = ffmpeg::ffi::av_malloc(buffer_size) as *mut u8;
        if buffer.is_null() {
            let _ = Box::from_raw(writer_ptr);
            return Err(MuxerError::Init("failed to allocate AVIO buffer".into()));
        }

        let avio_ctx = ffmpeg::ffi::avio_alloc_context(
            buffer,
            buffer_size as i32,
            1,
            writer_ptr as *mut c_void,
            None,
            Some(write_packet),
            Some(seek_packet),
        );
        if avio_ctx.is_null() {
            ffmpeg::ffi::av_free(buffer as *mut c_void);
            let _ = Box::from_raw(writer_ptr);
            return Err(MuxerError::Init("failed to allocate AVIO context".into()));
        }

        let mut output_ptr: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
        let filename = std::ffi::CString::new("memory.mp4").unwrap();
        let format_name = std::ffi::CString::new("mp4").unwrap();
        let ret = ffmpeg::ffi::avformat_alloc_output_context2(
            &mut output_ptr,
            ptr::null_mut(),
            format_name.as_ptr(),
            filename.as_ptr(),
        );
        if ret < 0 || output_ptr.is_null() {
            ffmpeg::ffi::avio_context_free(&mut { avio_ctx });
            let _ = Box::from_raw(writer_ptr);
            return Err(MuxerError::Init("failed to allocate output context".into()));
        }

        (*output_ptr).pb = avio_ctx;
        (*output_ptr).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

        let output = ffmpeg::format::context::Output::wrap(output_ptr);
        let writer = Box::from_raw(writer_ptr);
        Ok((output, writer))
    }
}

/// Detach the `AVIOContext` (`pb`) from an `AVFormatContext` before dropping
/// it, so `avformat_free_context` doesn't double-free the buffer our
/// `MemoryWriter`/`avio_alloc_context` pairing owns.
fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`;
    // setting `pb` to null is the documented way to hand AVIO ownership back
    // to the caller.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `codecpar` is non-null immediately after `set_parameters`;
    // `codec_tag` is a plain u32 field.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Build an AVCDecoderConfigurationRecord ("avcC") from raw SPS/PPS NAL
/// payloads (ISO/IEC 14496-15 §5.3.3.1), with a 4-byte NAL length field
/// (`lengthSizeMinusOne = 3`) matching the AVCC-formatted samples the
/// segmenter expects (see `DESIGN.md`, "bitstream format").
fn build_avcc_extradata(sps: &[u8], pps: &[u8], profile: u8, level: u8) -> Vec<u8> {
    let profile_compatibility = sps.get(1).copied().unwrap_or(0);
    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(1); // configurationVersion
    out.push(profile);
    out.push(profile_compatibility);
    out.push(level);
    out.push(0xFF); // reserved(6) | lengthSizeMinusOne(2) = 3
    out.push(0xE1); // reserved(3) | numOfSequenceParameterSets(5) = 1
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(1); // numOfPictureParameterSets
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    out
}

fn alloc_codec_parameters(
    codec_type: ffmpeg::ffi::AVMediaType,
    codec_id: ffmpeg::ffi::AVCodecID,
    extradata: &[u8],
) -> Result<*mut ffmpeg::ffi::AVCodecParameters, MuxerError> {
    // SAFETY: `avcodec_parameters_alloc` returns a valid pointer or null,
    // checked below. The fields written afterwards are plain scalars or a
    // freshly `av_malloc`'d buffer owned by this `AVCodecParameters`.
    unsafe {
        let ptr = ffmpeg::ffi::avcodec_parameters_alloc();
        if ptr.is_null() {
            return Err(MuxerError::AddStream(
                "failed to allocate codec parameters".into(),
            ));
        }
        (*ptr).codec_type = codec_type;
        (*ptr).codec_id = codec_id;

        if !extradata.is_empty() {
            let padded = extradata.len() + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let raw = ffmpeg::ffi::av_malloc(padded) as *mut u8;
            if raw.is_null() {
                let mut freed = ptr;
                ffmpeg::ffi::avcodec_parameters_free(&mut freed);
                return Err(MuxerError::AddStream(
                    "failed to allocate extradata buffer".into(),
                ));
            }
            std::ptr::copy_nonoverlapping(extradata.as_ptr(), raw, extradata.len());
            std::ptr::write_bytes(
                raw.add(extradata.len()),
                0,
                ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
            );
            (*ptr).extradata = raw;
            (*ptr).extradata_size = extradata.len() as i32;
        }

        Ok(ptr)
    }
}

fn avc_parameters(
    sps: &[u8],
    pps: &[u8],
    profile: u8,
    level: u8,
    width: u32,
    height: u32,
) -> Result<ffmpeg::codec::Parameters, MuxerError> {
    let extradata = build_avcc_extradata(sps, pps, profile, level);
    let ptr = alloc_codec_parameters(
        ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO,
        ffmpeg::ffi::AVCodecID::AV_CODEC_ID_H264,
        &extradata,
    )?;
    // SAFETY: `ptr` was just allocated above and is uniquely owned here;
    // these are plain scalar fields on `AVCodecParameters`.
    unsafe {
        (*ptr).width = width as i32;
        (*ptr).height = height as i32;
        (*ptr).profile = profile as i32;
        (*ptr).level = level as i32;
        Ok(ffmpeg::codec::Parameters::wrap(
            ptr,
            None::<Rc<dyn std::any::Any>>,
        ))
    }
}

fn aac_parameters(
    sample_rate: u32,
    channels: u16,
    asc: &[u8],
) -> Result<ffmpeg::codec::Parameters, MuxerError> {
    let ptr = alloc_codec_parameters(
        ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO,
        ffmpeg::ffi::AVCodecID::AV_CODEC_ID_AAC,
        asc,
    )?;
    // SAFETY: `ptr` was just allocated above and is uniquely owned here.
    // `ch_layout.order = UNSPEC` with `nb_channels` set is sufficient for
    // the muxer, which only consults channel count, not a full layout mask.
    unsafe {
        (*ptr).sample_rate = sample_rate as i32;
        (*ptr).ch_layout.order = ffmpeg::ffi::AVChannelOrder::AV_CHANNEL_ORDER_UNSPEC;
        (*ptr).ch_layout.nb_channels = channels as i32;
        Ok(ffmpeg::codec::Parameters::wrap(
            ptr,
            None::<Rc<dyn std::any::Any>>,
        ))
    }
}

/// One fMP4 muxer instance: good for exactly one init-segment-plus-media-run,
/// matching the collaborator contract in spec §5 ("`new(video_params,
/// audio_params)`, `append(sample)`, `finish()`"). The segmenter creates a
/// fresh instance per rotation and discards everything but the media bytes
/// for all but the first.
pub struct Fmp4Muxer {
    output: ffmpeg::format::context::Output,
    writer: Box<MemoryWriter>,
    streams: HashMap<MediaKind, usize>,
    timebases: HashMap<MediaKind, Rational>,
    header_written: bool,
    video_fps: Option<f32>,
}

impl Fmp4Muxer {
    /// Construct a muxer for this session's fixed set of elementary streams.
    /// At least one of `video`/`audio` must be `Some`. `video.3` is the
    /// nominal frame rate, used only to seed the init segment's `trex`
    /// default sample duration.
    pub fn new(
        video: Option<(&FormatDescription, u32, u32, f32)>,
        audio: Option<&FormatDescription>,
    ) -> Result<Self, MuxerError> {
        let (output, writer) = create_memory_io()?;
        let mut muxer = Self {
            output,
            writer,
            streams: HashMap::new(),
            timebases: HashMap::new(),
            header_written: false,
            video_fps: None,
        };

        let mut video_fps = None;
        if let Some((desc, width, height, fps)) = video {
            muxer.add_video_stream(desc, width, height)?;
            video_fps = Some(fps);
        }
        if let Some(desc) = audio {
            muxer.add_audio_stream(desc)?;
        }
        muxer.video_fps = video_fps;
        Ok(muxer)
    }

    fn add_video_stream(
        &mut self,
        desc: &FormatDescription,
        width: u32,
        height: u32,
    ) -> Result<(), MuxerError> {
        let params = match desc {
            FormatDescription::Avc {
                sps,
                pps,
                profile,
                level,
            } => avc_parameters(sps, pps, *profile, *level, width, height)?,
            FormatDescription::Hevc { .. } => {
                return Err(MuxerError::AddStream(
                    "HEVC stream parameter construction is not implemented".into(),
                ));
            }
            FormatDescription::Aac { .. } => {
                return Err(MuxerError::AddStream(
                    "expected a video format description".into(),
                ));
            }
        };

        let mut out_stream = self
            .output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| MuxerError::AddStream(format!("video stream: {e}")))?;
        out_stream.set_parameters(params);
        stream_reset_codec_tag(&mut out_stream);
        // 90kHz is the conventional HLS video timebase, matching the teacher.
        out_stream.set_time_base(ffmpeg::Rational::new(1, 90_000));
        let index = out_stream.index();
        self.streams.insert(MediaKind::Video, index);
        self.timebases
            .insert(MediaKind::Video, Rational::new(1, 90_000));
        Ok(())
    }

    fn add_audio_stream(&mut self, desc: &FormatDescription) -> Result<(), MuxerError> {
        let (sample_rate, channels, asc) = match desc {
            FormatDescription::Aac {
                sample_rate,
                channels,
                asc,
            } => (*sample_rate, *channels, asc),
            _ => {
                return Err(MuxerError::AddStream(
                    "expected an audio format description".into(),
                ));
            }
        };
        let params = aac_parameters(sample_rate, channels, asc)?;

        let mut out_stream = self
            .output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| MuxerError::AddStream(format!("audio stream: {e}")))?;
        out_stream.set_parameters(params);
        stream_reset_codec_tag(&mut out_stream);
        out_stream.set_time_base(ffmpeg::Rational::new(1, sample_rate as i32));
        let index = out_stream.index();
        self.streams.insert(MediaKind::Audio, index);
        self.timebases
            .insert(MediaKind::Audio, Rational::new(1, sample_rate as i64));
        Ok(())
    }

    /// Write the container header. Must be called before the first
    /// `append`. Returns the init segment bytes (ftyp+moov) the first time
    /// this muxer instance is used in a session; the segmenter discards this
    /// return value on every instance after the first.
    pub fn write_header(&mut self) -> Result<Bytes, MuxerError> {
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("movflags", "empty_moov+default_base_moof");
        opts.set("frag_duration", "60000000");
        opts.set("avoid_negative_ts", "0");

        self.output
            .write_header_with(opts)
            .map_err(|e| MuxerError::WriteHeader(e.to_string()))?;
        self.header_written = true;

        let mut data = self.writer.take();
        if let Some(fps) = self.video_fps {
            if fps > 0.0 {
                let ticks = (90_000.0 / fps).round() as u32;
                fix_trex_durations(&mut data, ticks);
            }
        }
        Ok(Bytes::from(data))
    }

    /// Append one access unit, rescaling its timestamps onto this stream's
    /// output timebase.
    pub fn append(&mut self, sample: &Sample) -> Result<(), MuxerError> {
        if !self.header_written {
            return Err(MuxerError::Failed("append before write_header".into()));
        }
        let &stream_index = self
            .streams
            .get(&sample.kind)
            .ok_or_else(|| MuxerError::Failed(format!("no stream configured for {:?}", sample.kind)))?;
        let out_timebase = self
            .timebases
            .get(&sample.kind)
            .copied()
            .unwrap_or(Rational::new(1, 1));

        let mut packet = ffmpeg::Packet::copy(&sample.payload);
        packet.set_stream(stream_index);
        let pts = rescale(sample.pts, out_timebase);
        let dts = rescale(sample.dts, out_timebase);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(dts));
        if let Some(duration) = sample.duration {
            packet.set_duration(rescale(duration, out_timebase));
        }
        if sample.keyframe {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        packet.set_position(-1);

        packet
            .write_interleaved(&mut self.output)
            .map_err(|e| MuxerError::WritePacket(e.to_string()))
    }

    /// Finalize the fragment/trailer and return the media bytes written
    /// since the last `write_header`/`take` (moof+mdat for every instance
    /// but the first, which also carries ftyp+moov — the caller locates the
    /// media boundary with [`crate::isobmff`] helpers or simply discards the
    /// leading init bytes it already captured from `write_header`).
    pub fn finish(mut self) -> Result<Bytes, MuxerError> {
        // write_trailer failing on an otherwise-complete fragment is
        // non-fatal in the teacher's handling; empty_moov/frag_duration
        // output has already flushed the fragment by the time this runs.
        let _ = self.output.write_trailer();
        let data = self.writer.take();
        detach_avio(&mut self.output);
        Ok(Bytes::from(data))
    }
}

impl Drop for Fmp4Muxer {
    fn drop(&mut self) {
        detach_avio(&mut self.output);
    }
}

/// Rescale a `value` expressed in seconds onto `out_timebase` (always
/// `1/out_den` for the streams this muxer constructs), producing integer
/// ticks for an `AVPacket`'s pts/dts/duration.
fn rescale(value: Rational, out_timebase: Rational) -> i64 {
    let out_num = out_timebase.num.max(1) as f64;
    let out_den = out_timebase.den as f64;
    (value.as_f64() * out_den / out_num).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avcc_extradata_has_expected_header_and_lengths() {
        let sps = vec![0x64, 0x00, 0x1f, 0xAA, 0xBB];
        let pps = vec![0x01, 0x02];
        let extradata = build_avcc_extradata(&sps, &pps, 0x64, 0x1f);

        assert_eq!(extradata[0], 1); // configurationVersion
        assert_eq!(extradata[1], 0x64); // profile
        assert_eq!(extradata[2], sps[1]); // profile_compatibility
        assert_eq!(extradata[3], 0x1f); // level
        assert_eq!(extradata[4], 0xFF);
        assert_eq!(extradata[5], 0xE1);
        let sps_len = u16::from_be_bytes([extradata[6], extradata[7]]) as usize;
        assert_eq!(sps_len, sps.len());
        assert_eq!(&extradata[8..8 + sps_len], &sps[..]);
        let pps_len_offset = 8 + sps_len + 1;
        let pps_len = u16::from_be_bytes([
            extradata[pps_len_offset],
            extradata[pps_len_offset + 1],
        ]) as usize;
        assert_eq!(pps_len, pps.len());
    }

    #[test]
    fn rescale_converts_seconds_to_90khz_ticks() {
        let pts = Rational::new(3, 1); // 3 seconds
        let ticks = rescale(pts, Rational::new(1, 90_000));
        assert_eq!(ticks, 270_000);
    }
}
