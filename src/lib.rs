//! **ez-demux** reads a media container on one background thread, repairs its
//! timestamps, and fans the packets out to any number of independent consumers.
//!
//! # Timestamp correction
//!
//! Every packet passes through the same chain before any consumer sees it,
//! in this order:
//!
//! 1. **Wrap correction**: containers with short timestamp fields (33-bit
//!    MPEG-TS clocks) wrap around; values past the stream start are unwrapped.
//! 2. **Offset and scale**: the user `ts_offset` and `ts_scale` options.
//! 3. **Discontinuity handling**: jumps larger than `dts_delta_threshold`
//!    are folded into a running offset on formats that allow discontinuities,
//!    and implausible timestamps are dropped on the others.
//! 4. **Next-DTS prediction**: the expected decode time of the following
//!    packet, used by step 3.
//!
//! ## Backpressure
//!
//! | Situation | Behavior |
//! |-----------|----------|
//! | Consumer queue has room | Packet enqueued |
//! | Consumer queue full | Packet dropped for that consumer only, counted in `dropped_packets()` |
//! | Every queue full | Demuxer thread waits instead of reading |
//! | No consumer attached | Demuxer thread waits |
//!
//! # Example
//!
//! ```rust,ignore
//! use ez_demux::{DemuxOptions, Demuxer, FfmpegSource, StreamSelector};
//!
//! let demuxer = Demuxer::open(
//!     FfmpegSource::new("input.ts"),
//!     DemuxOptions::new().set_start_with_keyframe(true),
//! )?;
//!
//! let mut video = demuxer.open_consumer(StreamSelector::Stream(0))?;
//! for packet in video.packets() {
//!     let packet = packet?;
//!     println!("dts={:?} size={}", packet.dts(), packet.size());
//! }
//! ```
//!
//! Without the `ffmpeg` feature, any [`PacketSource`] can drive the engine;
//! [`MemorySource`] replays a scripted list of packets.

pub mod core;
pub mod error;
pub mod util;

pub use crate::core::options::DemuxOptions;
pub use crate::core::packet::Packet;
pub use crate::core::source::{ContainerInfo, MemorySource, PacketSource, SeekFlags};
pub use crate::core::stream_info::{MediaType, StreamInfo};
pub use crate::core::{Consumer, DemuxStatus, Demuxer, PacketIter, StreamSelector, TryReceive};
pub use crate::error::{Error, Result};
pub use crate::util::rational::Rational;

#[cfg(feature = "ffmpeg")]
pub use crate::core::ffmpeg_source::FfmpegSource;
