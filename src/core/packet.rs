use bytes::Bytes;

use crate::util::rational::{Rational, NOPTS_VALUE};

/// Packet contains a keyframe.
pub const PKT_FLAG_KEY: u32 = 1 << 0;
/// Packet content is known to be damaged.
pub const PKT_FLAG_CORRUPT: u32 = 1 << 1;

/// One demultiplexed, still-compressed unit of an elementary stream.
///
/// The payload is a [`Bytes`] handle, so `clone()` only bumps a reference
/// count and copies the small timing metadata. Every consumer receives its own
/// `Packet` value; rewriting the timestamps of one clone never affects another,
/// and the underlying buffer is released when the last clone is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    data: Bytes,
    pub(crate) stream_index: usize,
    pub(crate) pts: i64,
    pub(crate) dts: i64,
    pub(crate) duration: i64,
    pub(crate) time_base: Rational,
    pub(crate) flags: u32,
    pub(crate) pos: i64,
}

impl Packet {
    /// Creates a packet with no timestamps, zero duration and no flags.
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            stream_index,
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            duration: 0,
            time_base: Rational::new(0, 1),
            flags: 0,
            pos: -1,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts.unwrap_or(NOPTS_VALUE);
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts.unwrap_or(NOPTS_VALUE);
        self
    }

    /// Sets both pts and dts to the same value.
    pub fn with_ts(self, ts: i64) -> Self {
        self.with_pts(Some(ts)).with_dts(Some(ts))
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_keyframe(mut self, is_keyframe: bool) -> Self {
        if is_keyframe {
            self.flags |= PKT_FLAG_KEY;
        } else {
            self.flags &= !PKT_FLAG_KEY;
        }
        self
    }

    pub fn with_corrupt(mut self, is_corrupt: bool) -> Self {
        if is_corrupt {
            self.flags |= PKT_FLAG_CORRUPT;
        } else {
            self.flags &= !PKT_FLAG_CORRUPT;
        }
        self
    }

    pub fn with_pos(mut self, pos: i64) -> Self {
        self.pos = pos;
        self
    }

    /// The index of the stream this packet belongs to.
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Presentation timestamp in `time_base` units, if known.
    pub fn pts(&self) -> Option<i64> {
        (self.pts != NOPTS_VALUE).then_some(self.pts)
    }

    /// Decompression timestamp in `time_base` units, if known.
    pub fn dts(&self) -> Option<i64> {
        (self.dts != NOPTS_VALUE).then_some(self.dts)
    }

    /// Duration in `time_base` units, 0 if unknown.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Time base of `pts`, `dts` and `duration`. Attached by the demuxer from
    /// the owning stream before any timestamp correction runs.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & PKT_FLAG_KEY != 0
    }

    pub fn is_corrupt(&self) -> bool {
        self.flags & PKT_FLAG_CORRUPT != 0
    }

    /// Byte position in the input, or -1 if unknown.
    pub fn pos(&self) -> i64 {
        self.pos
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// A second handle on the payload, sharing the same allocation.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}
