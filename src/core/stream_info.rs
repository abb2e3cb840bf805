use crate::util::rational::{Rational, NOPTS_VALUE};

/// Timestamps of a stream with this many bits never wrap.
pub const PTS_WRAP_BITS_NONE: u32 = 64;

/// Broad media category of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
    Unknown,
}

/// Immutable per-stream metadata supplied by the container layer.
///
/// Created once when the source is opened and read-only afterwards. The fields
/// consulted by timestamp correction are the time base, `pts_wrap_bits`, and
/// the rate fields used to predict the next decode timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamInfo {
    /// Video stream information
    Video {
        /// The index of the stream within the container.
        index: usize,

        /// The time base for the stream, representing the unit of time for each packet.
        time_base: Rational,

        /// The start time of the stream, in `time_base` units, or `NOPTS_VALUE`.
        start_time: i64,

        /// Number of bits the container uses to encode timestamps before they wrap.
        pts_wrap_bits: u32,

        /// The average frame rate of the stream, `0/x` if unknown.
        avg_frame_rate: Rational,

        /// The frame rate declared by the codec parameters, `0/x` if unknown.
        framerate: Rational,

        /// Delay introduced by the video codec (reordering), in frames.
        video_delay: i32,

        /// A human-readable name of the codec.
        codec_name: String,
    },
    /// Audio stream information
    Audio {
        /// The index of the stream within the container.
        index: usize,

        /// The time base for the stream, representing the unit of time for each packet.
        time_base: Rational,

        /// The start time of the stream, in `time_base` units, or `NOPTS_VALUE`.
        start_time: i64,

        /// Number of bits the container uses to encode timestamps before they wrap.
        pts_wrap_bits: u32,

        /// The audio sample rate, measured in samples per second (Hz).
        sample_rate: i32,

        /// Samples per channel in one coded frame, 0 if variable or unknown.
        frame_size: i32,

        /// A human-readable name of the codec.
        codec_name: String,
    },
    /// Subtitle stream information
    Subtitle {
        index: usize,
        time_base: Rational,
        start_time: i64,
        pts_wrap_bits: u32,
        codec_name: String,
    },
    /// Data stream information
    Data {
        index: usize,
        time_base: Rational,
        start_time: i64,
        pts_wrap_bits: u32,
    },
    /// Unknown or unrecognized stream type.
    Unknown {
        index: usize,
        time_base: Rational,
        pts_wrap_bits: u32,
    },
}

impl StreamInfo {
    /// A video stream that never wraps, with no declared rates.
    pub fn video(index: usize, time_base: Rational) -> Self {
        StreamInfo::Video {
            index,
            time_base,
            start_time: NOPTS_VALUE,
            pts_wrap_bits: PTS_WRAP_BITS_NONE,
            avg_frame_rate: Rational::new(0, 1),
            framerate: Rational::new(0, 1),
            video_delay: 0,
            codec_name: String::new(),
        }
    }

    /// An audio stream that never wraps.
    pub fn audio(index: usize, time_base: Rational, sample_rate: i32, frame_size: i32) -> Self {
        StreamInfo::Audio {
            index,
            time_base,
            start_time: NOPTS_VALUE,
            pts_wrap_bits: PTS_WRAP_BITS_NONE,
            sample_rate,
            frame_size,
            codec_name: String::new(),
        }
    }

    pub fn data(index: usize, time_base: Rational) -> Self {
        StreamInfo::Data {
            index,
            time_base,
            start_time: NOPTS_VALUE,
            pts_wrap_bits: PTS_WRAP_BITS_NONE,
        }
    }

    pub fn with_pts_wrap_bits(mut self, bits: u32) -> Self {
        match &mut self {
            StreamInfo::Video { pts_wrap_bits, .. }
            | StreamInfo::Audio { pts_wrap_bits, .. }
            | StreamInfo::Subtitle { pts_wrap_bits, .. }
            | StreamInfo::Data { pts_wrap_bits, .. }
            | StreamInfo::Unknown { pts_wrap_bits, .. } => *pts_wrap_bits = bits,
        }
        self
    }

    /// Sets the declared frame rates of a video stream. No-op for other types.
    pub fn with_frame_rates(mut self, avg: Rational, codec: Rational) -> Self {
        if let StreamInfo::Video { avg_frame_rate, framerate, .. } = &mut self {
            *avg_frame_rate = avg;
            *framerate = codec;
        }
        self
    }

    /// Sets the reorder delay of a video stream. No-op for other types.
    pub fn with_video_delay(mut self, delay: i32) -> Self {
        if let StreamInfo::Video { video_delay, .. } = &mut self {
            *video_delay = delay;
        }
        self
    }

    /// Returns a human-readable label for this stream's type
    /// (e.g. `"Video"`, `"Audio"`, `"Unknown"`).
    pub fn stream_type(&self) -> &'static str {
        match self {
            StreamInfo::Video { .. } => "Video",
            StreamInfo::Audio { .. } => "Audio",
            StreamInfo::Subtitle { .. } => "Subtitle",
            StreamInfo::Data { .. } => "Data",
            StreamInfo::Unknown { .. } => "Unknown",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            StreamInfo::Video { .. } => MediaType::Video,
            StreamInfo::Audio { .. } => MediaType::Audio,
            StreamInfo::Subtitle { .. } => MediaType::Subtitle,
            StreamInfo::Data { .. } => MediaType::Data,
            StreamInfo::Unknown { .. } => MediaType::Unknown,
        }
    }

    /// Returns `true` if this is a video stream.
    pub fn is_video(&self) -> bool {
        matches!(self, StreamInfo::Video { .. })
    }

    /// Returns `true` if this is an audio stream.
    pub fn is_audio(&self) -> bool {
        matches!(self, StreamInfo::Audio { .. })
    }

    /// Returns the stream index within the container.
    pub fn index(&self) -> usize {
        match self {
            StreamInfo::Video { index, .. }
            | StreamInfo::Audio { index, .. }
            | StreamInfo::Subtitle { index, .. }
            | StreamInfo::Data { index, .. }
            | StreamInfo::Unknown { index, .. } => *index,
        }
    }

    pub fn time_base(&self) -> Rational {
        match self {
            StreamInfo::Video { time_base, .. }
            | StreamInfo::Audio { time_base, .. }
            | StreamInfo::Subtitle { time_base, .. }
            | StreamInfo::Data { time_base, .. }
            | StreamInfo::Unknown { time_base, .. } => *time_base,
        }
    }

    pub fn pts_wrap_bits(&self) -> u32 {
        match self {
            StreamInfo::Video { pts_wrap_bits, .. }
            | StreamInfo::Audio { pts_wrap_bits, .. }
            | StreamInfo::Subtitle { pts_wrap_bits, .. }
            | StreamInfo::Data { pts_wrap_bits, .. }
            | StreamInfo::Unknown { pts_wrap_bits, .. } => *pts_wrap_bits,
        }
    }
}
