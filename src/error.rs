use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for every fallible operation of the demux engine.
///
/// Errors are `Clone` so that a single driver-fatal failure can be handed to
/// every consumer that observes the broken state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Open input error: {0}")]
    OpenInput(#[from] OpenInputError),

    #[error("Demuxing error: {0}")]
    Demuxing(#[from] DemuxingOperationError),

    #[error("Invalid option: {0}")]
    Option(#[from] OptionError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),
}

/// Result codes a [`PacketSource`](crate::core::source::PacketSource) reports
/// from its read, seek and open calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxingError {
    /// No data available yet; the caller should retry later.
    #[error("Resource temporarily unavailable")]
    Again,

    #[error("End of file")]
    EndOfFile,

    /// The operation was interrupted by a close request.
    #[error("Immediate exit requested")]
    Exit,

    #[error("Invalid data found when processing input")]
    InvalidData,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unknown error code: {0}")]
    Code(i32),

    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "ffmpeg")]
impl From<i32> for DemuxingError {
    fn from(err_code: i32) -> Self {
        use ffmpeg_sys_next::{AVERROR, AVERROR_EOF, AVERROR_EXIT, AVERROR_INVALIDDATA, EAGAIN};

        match err_code {
            code if code == AVERROR(EAGAIN) => DemuxingError::Again,
            code if code == AVERROR_EOF => DemuxingError::EndOfFile,
            code if code == AVERROR_EXIT => DemuxingError::Exit,
            code if code == AVERROR_INVALIDDATA => DemuxingError::InvalidData,
            code if code == AVERROR(libc::EIO) => {
                DemuxingError::Io(crate::core::ffmpeg_source::av_err2str(code))
            }
            code => DemuxingError::Code(code),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemuxingOperationError {
    #[error("Failed to read packet: {0}")]
    ReadFrameError(DemuxingError),

    #[error("Failed to seek: {0}")]
    SeekError(DemuxingError),

    #[error("Corrupt input packet in stream {0}")]
    CorruptPacket(usize),

    #[error("Demuxer thread exited")]
    ThreadExited,

    #[error("Demuxer already stopped")]
    Stopped,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpenInputError {
    #[error("Failed to open source: {0}")]
    Source(DemuxingError),

    #[error("Source reported no streams")]
    NoStreams,

    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

/// Configuration rejected at open time, before the driver ever runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionError {
    #[error("dts_delta_threshold must be a positive finite number of seconds, got {0}")]
    DtsDeltaThreshold(f64),

    #[error("dts_error_threshold must be a positive finite number of seconds, got {0}")]
    DtsErrorThreshold(f64),

    #[error("queue_capacity must be at least 1")]
    QueueCapacity,

    #[error("ts_scale must be finite and non-zero, got {0}")]
    TsScale(f64),

    #[error("readrate must be finite and non-negative, got {0}")]
    Readrate(f32),

    #[error("framerate must be positive, got {0}")]
    Framerate(crate::util::rational::Rational),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("Stream index {0} does not exist")]
    UnknownStream(usize),
}
