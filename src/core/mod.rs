//! Demux engine: a single reader thread per input, timestamp correction, and
//! bounded per-consumer queues.

pub mod consumer;
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source;
pub mod options;
pub mod packet;
pub(crate) mod scheduler;
pub mod source;
pub mod stream_info;

pub use consumer::{Consumer, PacketIter, TryReceive};
pub use demuxer::Demuxer;
pub use scheduler::fanout::StreamSelector;
pub use scheduler::DemuxStatus;
