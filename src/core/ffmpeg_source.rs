//! A [`PacketSource`] backed by libavformat.
//!
//! Only compiled with the `ffmpeg` feature. Packets are handed out without
//! copying: each [`Packet`] payload keeps its own reference to the `AVPacket`
//! buffer, released when the last clone is dropped.

use std::ffi::{c_void, CStr, CString};
use std::ptr::{null, null_mut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ffmpeg_sys_next::AVMediaType::{
    AVMEDIA_TYPE_AUDIO, AVMEDIA_TYPE_DATA, AVMEDIA_TYPE_SUBTITLE, AVMEDIA_TYPE_VIDEO,
};
use ffmpeg_sys_next::{
    av_dict_free, av_dict_set, av_packet_alloc, av_packet_free, av_read_frame, av_strerror,
    avcodec_get_name, avformat_alloc_context, avformat_close_input, avformat_find_stream_info,
    avformat_open_input, avformat_seek_file, AVCodecID, AVFormatContext, AVIOInterruptCB,
    AVPacket, AVStream, AVERROR, AVFMT_TS_DISCONT, AVSEEK_FLAG_ANY, AVSEEK_FLAG_BYTE,
    AV_DICT_DONT_OVERWRITE, AV_NOPTS_VALUE, AV_PKT_FLAG_CORRUPT, AV_PKT_FLAG_KEY,
};
use libc::{c_char, c_int, ENOMEM};
use log::{debug, warn};

use crate::core::packet::Packet;
use crate::core::source::{ContainerInfo, PacketSource, SeekFlags};
use crate::core::stream_info::StreamInfo;
use crate::error::DemuxingError;
use crate::util::rational::Rational;

/// Human-readable text for a libav error code.
pub(crate) fn av_err2str(err: c_int) -> String {
    let mut buf = [0 as c_char; 128];
    // SAFETY: buf is writable for its full length and av_strerror always
    // NUL-terminates within the given size.
    unsafe {
        if av_strerror(err, buf.as_mut_ptr(), buf.len()) < 0 {
            return format!("Unknown error code: {err}");
        }
        CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
    }
}

/// Owns one `AVPacket` reference so its buffer can back a `Bytes`.
struct PacketBuffer(*mut AVPacket);

// SAFETY: the AVPacket is exclusively owned by this wrapper and only read
// through `as_ref`; its buffer is reference counted by libav.
unsafe impl Send for PacketBuffer {}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: self.0 is a valid packet filled by av_read_frame; data is
        // either null or points to `size` readable bytes.
        unsafe {
            let pkt = &*self.0;
            if pkt.data.is_null() || pkt.size <= 0 {
                &[]
            } else {
                std::slice::from_raw_parts(pkt.data, pkt.size as usize)
            }
        }
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated by av_packet_alloc; av_packet_free unrefs and frees.
        unsafe { av_packet_free(&mut self.0) }
    }
}

unsafe extern "C" fn interrupt_cb(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    // SAFETY: opaque points into the Arc<AtomicBool> kept alive by the source.
    let flag = &*(opaque as *const AtomicBool);
    flag.load(Ordering::Acquire) as c_int
}

/// Reads a media file or URL through libavformat.
///
/// ```rust,ignore
/// let demuxer = Demuxer::open(FfmpegSource::new("input.ts"), DemuxOptions::new())?;
/// ```
pub struct FfmpegSource {
    url: String,
    fmt_ctx: *mut AVFormatContext,
    interrupt: Option<Arc<AtomicBool>>,
}

// SAFETY: FfmpegSource owns its AVFormatContext exclusively and is moved to
// the demuxer thread, never shared. The only registered callback reads an
// AtomicBool owned by the source itself.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fmt_ctx: null_mut(),
            interrupt: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// # Safety
    /// `fmt_ctx` must be a valid, allocated format context.
    unsafe fn install_interrupt(&self, fmt_ctx: *mut AVFormatContext) {
        if let Some(flag) = &self.interrupt {
            (*fmt_ctx).interrupt_callback = AVIOInterruptCB {
                callback: Some(interrupt_cb),
                opaque: Arc::as_ptr(flag) as *mut c_void,
            };
        }
    }

    /// # Safety
    /// `fmt_ctx` must have been opened and probed successfully.
    unsafe fn container_info(fmt_ctx: *mut AVFormatContext) -> ContainerInfo {
        let ctx = &*fmt_ctx;
        let (format_name, ts_discont) = if ctx.iformat.is_null() {
            ("unknown".to_string(), false)
        } else {
            let iformat = &*ctx.iformat;
            let name = if iformat.name.is_null() {
                "unknown".to_string()
            } else {
                CStr::from_ptr(iformat.name).to_string_lossy().into_owned()
            };
            (name, iformat.flags & AVFMT_TS_DISCONT != 0)
        };

        let nb_streams = ctx.nb_streams as usize;
        let mut streams = Vec::with_capacity(nb_streams);
        if !ctx.streams.is_null() {
            for i in 0..nb_streams {
                let raw_stream = *ctx.streams.add(i);
                if raw_stream.is_null() {
                    streams.push(StreamInfo::Unknown {
                        index: i,
                        time_base: Rational::new(1, 1),
                        pts_wrap_bits: 64,
                    });
                    continue;
                }
                streams.push(extract_stream_info(i, raw_stream));
            }
        }

        ContainerInfo::new(format_name, streams)
            .with_start_time(ctx.start_time)
            .with_ts_discont(ts_discont)
    }
}

/// # Safety
/// `raw_stream` must be a valid, non-null `AVStream`.
unsafe fn extract_stream_info(index: usize, raw_stream: *mut AVStream) -> StreamInfo {
    let stream = &*raw_stream;
    let time_base = Rational::from(stream.time_base);
    let pts_wrap_bits = stream.pts_wrap_bits.clamp(0, 64) as u32;
    let start_time = stream.start_time;

    if stream.codecpar.is_null() {
        return StreamInfo::Unknown {
            index,
            time_base,
            pts_wrap_bits,
        };
    }
    let codecpar = &*stream.codecpar;
    let codec_name = codec_name(codecpar.codec_id);

    match codecpar.codec_type {
        AVMEDIA_TYPE_VIDEO => StreamInfo::Video {
            index,
            time_base,
            start_time,
            pts_wrap_bits,
            avg_frame_rate: Rational::from(stream.avg_frame_rate),
            framerate: Rational::from(codecpar.framerate),
            video_delay: codecpar.video_delay,
            codec_name,
        },
        AVMEDIA_TYPE_AUDIO => StreamInfo::Audio {
            index,
            time_base,
            start_time,
            pts_wrap_bits,
            sample_rate: codecpar.sample_rate,
            frame_size: codecpar.frame_size,
            codec_name,
        },
        AVMEDIA_TYPE_SUBTITLE => StreamInfo::Subtitle {
            index,
            time_base,
            start_time,
            pts_wrap_bits,
            codec_name,
        },
        AVMEDIA_TYPE_DATA => StreamInfo::Data {
            index,
            time_base,
            start_time,
            pts_wrap_bits,
        },
        _ => StreamInfo::Unknown {
            index,
            time_base,
            pts_wrap_bits,
        },
    }
}

#[inline]
fn codec_name(id: AVCodecID) -> String {
    // SAFETY: avcodec_get_name returns a static string for any id.
    unsafe {
        let ptr = avcodec_get_name(id);
        if ptr.is_null() {
            "Unknown codec".into()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

impl PacketSource for FfmpegSource {
    fn open(&mut self) -> Result<ContainerInfo, DemuxingError> {
        if !self.fmt_ctx.is_null() {
            return Err(DemuxingError::Other(format!("{} is already open", self.url)));
        }
        let url = CString::new(self.url.as_str()).map_err(|e| DemuxingError::Other(e.to_string()))?;

        // SAFETY: every allocation is released on each error path;
        // avformat_open_input frees the context itself when it fails.
        unsafe {
            let mut fmt_ctx = avformat_alloc_context();
            if fmt_ctx.is_null() {
                return Err(DemuxingError::from(AVERROR(ENOMEM)));
            }
            self.install_interrupt(fmt_ctx);

            let mut format_opts = null_mut();
            av_dict_set(
                &mut format_opts,
                c"scan_all_pmts".as_ptr(),
                c"1".as_ptr(),
                AV_DICT_DONT_OVERWRITE,
            );
            let ret = avformat_open_input(&mut fmt_ctx, url.as_ptr(), null(), &mut format_opts);
            av_dict_free(&mut format_opts);
            if ret < 0 {
                avformat_close_input(&mut fmt_ctx);
                return Err(DemuxingError::from(ret));
            }

            let ret = avformat_find_stream_info(fmt_ctx, null_mut());
            if ret < 0 {
                avformat_close_input(&mut fmt_ctx);
                return Err(DemuxingError::from(ret));
            }

            let info = Self::container_info(fmt_ctx);
            debug!(
                "Opened {} as {} ({} streams, ts_discont={})",
                self.url,
                info.format_name,
                info.streams.len(),
                info.ts_discont
            );
            self.fmt_ctx = fmt_ctx;
            Ok(info)
        }
    }

    fn read_packet(&mut self) -> Result<Packet, DemuxingError> {
        if self.fmt_ctx.is_null() {
            return Err(DemuxingError::Other(format!("{} is not open", self.url)));
        }
        // SAFETY: fmt_ctx is open; pkt is checked for null and owned by
        // PacketBuffer from here on, so every path frees it.
        unsafe {
            let pkt = av_packet_alloc();
            if pkt.is_null() {
                return Err(DemuxingError::from(AVERROR(ENOMEM)));
            }
            let buffer = PacketBuffer(pkt);

            let ret = av_read_frame(self.fmt_ctx, pkt);
            if ret < 0 {
                return Err(DemuxingError::from(ret));
            }

            let raw = &*pkt;
            let stream_index = raw.stream_index.max(0) as usize;
            let pts = (raw.pts != AV_NOPTS_VALUE).then_some(raw.pts);
            let dts = (raw.dts != AV_NOPTS_VALUE).then_some(raw.dts);
            let (duration, flags, pos) = (raw.duration, raw.flags, raw.pos);

            Ok(Packet::new(stream_index, Bytes::from_owner(buffer))
                .with_pts(pts)
                .with_dts(dts)
                .with_duration(duration)
                .with_keyframe(flags & AV_PKT_FLAG_KEY != 0)
                .with_corrupt(flags & AV_PKT_FLAG_CORRUPT != 0)
                .with_pos(pos))
        }
    }

    fn seek(
        &mut self,
        timestamp: i64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<(), DemuxingError> {
        if self.fmt_ctx.is_null() {
            return Err(DemuxingError::Other(format!("{} is not open", self.url)));
        }
        let mut seek_flags = 0;
        if flags.byte {
            seek_flags |= AVSEEK_FLAG_BYTE as c_int;
        }
        if flags.any {
            seek_flags |= AVSEEK_FLAG_ANY as c_int;
        }
        let (min_ts, max_ts) = if flags.backward {
            (i64::MIN, timestamp)
        } else {
            (timestamp, i64::MAX)
        };
        let stream_index = stream_index.map(|i| i as c_int).unwrap_or(-1);

        // SAFETY: fmt_ctx is open; avformat_seek_file validates its arguments.
        let ret = unsafe {
            avformat_seek_file(self.fmt_ctx, stream_index, min_ts, timestamp, max_ts, seek_flags)
        };
        if ret < 0 {
            warn!("Seek in {} to {timestamp} failed: {}", self.url, av_err2str(ret));
            return Err(DemuxingError::from(ret));
        }
        Ok(())
    }

    fn set_interrupt(&mut self, interrupt: Arc<AtomicBool>) {
        self.interrupt = Some(interrupt);
        if !self.fmt_ctx.is_null() {
            // SAFETY: fmt_ctx is open and owned by self.
            unsafe { self.install_interrupt(self.fmt_ctx) }
        }
    }

    fn close(&mut self) {
        if !self.fmt_ctx.is_null() {
            // SAFETY: fmt_ctx was opened by avformat_open_input; this nulls it.
            unsafe { avformat_close_input(&mut self.fmt_ctx) }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}
