use std::time::Duration;

use crate::error::OptionError;
use crate::util::rational::Rational;

const DEFAULT_DTS_DELTA_THRESHOLD: f64 = 10.0;
const DEFAULT_DTS_ERROR_THRESHOLD: f64 = 3600.0 * 30.0;
const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Demuxer configuration.
///
/// Built with the `set_*` methods and validated once by
/// [`Demuxer::open`](crate::Demuxer::open); invalid values never reach the
/// demuxer thread.
///
/// ```rust,ignore
/// let options = DemuxOptions::new()
///     .set_dts_delta_threshold(5.0)
///     .set_start_with_keyframe(true)
///     .set_queue_capacity(32);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxOptions {
    pub(crate) dts_delta_threshold: f64,
    pub(crate) dts_error_threshold: f64,
    pub(crate) copy_ts: bool,
    pub(crate) start_with_keyframe: bool,
    pub(crate) queue_capacity: usize,
    pub(crate) ts_offset_us: i64,
    pub(crate) ts_scale: f64,
    pub(crate) framerate: Rational,
    pub(crate) readrate: Option<f32>,
    pub(crate) exit_on_error: bool,
    pub(crate) retry_interval: Duration,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            dts_delta_threshold: DEFAULT_DTS_DELTA_THRESHOLD,
            dts_error_threshold: DEFAULT_DTS_ERROR_THRESHOLD,
            copy_ts: false,
            start_with_keyframe: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ts_offset_us: 0,
            ts_scale: 1.0,
            framerate: Rational::new(0, 0),
            readrate: None,
            exit_on_error: false,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl DemuxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp jump, in seconds, that counts as a discontinuity for formats
    /// whose timestamps may jump (MPEG-TS and the like). Default: 10.
    ///
    /// FFmpeg CLI: `-dts_delta_threshold`
    pub fn set_dts_delta_threshold(mut self, seconds: f64) -> Self {
        self.dts_delta_threshold = seconds;
        self
    }

    /// Timestamp jump, in seconds, after which timestamps of continuous
    /// formats are discarded as invalid. Default: 108000 (30 hours).
    ///
    /// FFmpeg CLI: `-dts_error_threshold`
    pub fn set_dts_error_threshold(mut self, seconds: f64) -> Self {
        self.dts_error_threshold = seconds;
        self
    }

    /// Keeps input timestamps as they are: discontinuity correction is
    /// disabled except where the wrap heuristic decides a wrap happened.
    ///
    /// FFmpeg CLI: `-copyts`
    pub fn set_copy_ts(mut self, copy_ts: bool) -> Self {
        self.copy_ts = copy_ts;
        self
    }

    /// Consumers drop leading video packets until the first keyframe of each
    /// video stream. Audio is never held back.
    pub fn set_start_with_keyframe(mut self, start_with_keyframe: bool) -> Self {
        self.start_with_keyframe = start_with_keyframe;
        self
    }

    /// Maximum number of packets buffered per consumer queue. Default: 100.
    pub fn set_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Offset in microseconds added to every input timestamp.
    ///
    /// FFmpeg CLI: `-itsoffset`
    pub fn set_ts_offset_us(mut self, offset_us: i64) -> Self {
        self.ts_offset_us = offset_us;
        self
    }

    /// Scale factor applied to input timestamps after the offset.
    /// Results are truncated toward zero. Default: 1.0.
    ///
    /// FFmpeg CLI: `-itsscale`
    pub fn set_ts_scale(mut self, ts_scale: f64) -> Self {
        self.ts_scale = ts_scale;
        self
    }

    /// Forces the input video frame rate used to predict the next DTS.
    ///
    /// FFmpeg CLI: `-r` (as an input option)
    pub fn set_framerate(mut self, framerate: Rational) -> Self {
        self.framerate = framerate;
        self
    }

    /// Reads at `readrate` times real time. `0.0` disables pacing.
    ///
    /// FFmpeg CLI: `-readrate`
    pub fn set_readrate(mut self, readrate: f32) -> Self {
        self.readrate = Some(readrate);
        self
    }

    /// Treat corrupt packets as fatal instead of forwarding them with a warning.
    ///
    /// FFmpeg CLI: `-xerror`
    pub fn set_exit_on_error(mut self, exit_on_error: bool) -> Self {
        self.exit_on_error = exit_on_error;
        self
    }

    /// Sleep between retries when the source has no data yet. Default: 10ms.
    pub fn set_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn start_with_keyframe(&self) -> bool {
        self.start_with_keyframe
    }

    pub fn copy_ts(&self) -> bool {
        self.copy_ts
    }

    pub(crate) fn validate(&self) -> Result<(), OptionError> {
        if !(self.dts_delta_threshold.is_finite() && self.dts_delta_threshold > 0.0) {
            return Err(OptionError::DtsDeltaThreshold(self.dts_delta_threshold));
        }
        if !(self.dts_error_threshold.is_finite() && self.dts_error_threshold > 0.0) {
            return Err(OptionError::DtsErrorThreshold(self.dts_error_threshold));
        }
        if self.queue_capacity == 0 {
            return Err(OptionError::QueueCapacity);
        }
        if !self.ts_scale.is_finite() || self.ts_scale == 0.0 {
            return Err(OptionError::TsScale(self.ts_scale));
        }
        if let Some(readrate) = self.readrate {
            if !(readrate.is_finite() && readrate >= 0.0) {
                return Err(OptionError::Readrate(readrate));
            }
        }
        if self.framerate.num != 0 && (self.framerate.num < 0 || self.framerate.den <= 0) {
            return Err(OptionError::Framerate(self.framerate));
        }
        Ok(())
    }
}
