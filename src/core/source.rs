//! The container-reading collaborator consumed by the demuxer.
//!
//! A [`PacketSource`] is owned exclusively by the demuxer thread once reading
//! starts, so implementations never have to be `Sync`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::packet::Packet;
use crate::core::stream_info::StreamInfo;
use crate::error::DemuxingError;
use crate::util::rational::{compare_ts, TIME_BASE_Q, NOPTS_VALUE};

/// What a source reports when it is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    /// Short name of the container format, used for thread naming and logs.
    pub format_name: String,
    /// Per-stream descriptors, indexed by stream index.
    pub streams: Vec<StreamInfo>,
    /// Container start time in microseconds, or `NOPTS_VALUE` if unknown.
    pub start_time: i64,
    /// The format's timestamps may jump (e.g. MPEG-TS), as opposed to
    /// continuous box/atom based formats.
    pub ts_discont: bool,
}

impl ContainerInfo {
    pub fn new(format_name: impl Into<String>, streams: Vec<StreamInfo>) -> Self {
        Self {
            format_name: format_name.into(),
            streams,
            start_time: NOPTS_VALUE,
            ts_discont: false,
        }
    }

    pub fn with_start_time(mut self, start_time_us: i64) -> Self {
        self.start_time = start_time_us;
        self
    }

    pub fn with_ts_discont(mut self, ts_discont: bool) -> Self {
        self.ts_discont = ts_discont;
        self
    }
}

/// Seek behaviour hints, interpreted by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekFlags {
    /// Seek to the closest keyframe at or before the target.
    pub backward: bool,
    /// Target is a byte offset rather than a timestamp.
    pub byte: bool,
    /// Allow landing on non-keyframes.
    pub any: bool,
}

/// The "read next coded unit" primitive plus its open/seek/close companions.
pub trait PacketSource: Send {
    /// Opens the container and returns its stream descriptors.
    fn open(&mut self) -> Result<ContainerInfo, DemuxingError>;

    /// Reads the next packet in container order.
    ///
    /// Must return [`DemuxingError::Again`] when no data is available yet and
    /// [`DemuxingError::EndOfFile`] at the end of the input.
    fn read_packet(&mut self) -> Result<Packet, DemuxingError>;

    /// Repositions the source. `timestamp` is in the time base of
    /// `stream_index`, or in microseconds when no stream is given.
    fn seek(
        &mut self,
        timestamp: i64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<(), DemuxingError>;

    /// Hands the source the flag raised by `Demuxer::close`. Sources that block
    /// inside `read_packet` should poll it and return [`DemuxingError::Exit`].
    fn set_interrupt(&mut self, _interrupt: Arc<AtomicBool>) {}

    /// Releases the container. Called once, from the thread that owns the source.
    fn close(&mut self) {}
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn open(&mut self) -> Result<ContainerInfo, DemuxingError> {
        (**self).open()
    }

    fn read_packet(&mut self) -> Result<Packet, DemuxingError> {
        (**self).read_packet()
    }

    fn seek(
        &mut self,
        timestamp: i64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<(), DemuxingError> {
        (**self).seek(timestamp, stream_index, flags)
    }

    fn set_interrupt(&mut self, interrupt: Arc<AtomicBool>) {
        (**self).set_interrupt(interrupt)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

#[derive(Debug, Clone)]
enum ScriptItem {
    Packet(Packet),
    Again,
    Error(DemuxingError),
}

/// A scripted in-memory source.
///
/// Replays a fixed sequence of packets, transient "would block" results and
/// errors. Useful for feeding pre-demuxed data through the timestamp
/// correction and fan-out machinery, and for exercising it in tests.
pub struct MemorySource {
    info: ContainerInfo,
    script: Vec<ScriptItem>,
    cursor: usize,
    read_delay: Option<Duration>,
    reads: Arc<AtomicUsize>,
    interrupt: Option<Arc<AtomicBool>>,
    closed: Arc<AtomicBool>,
}

impl MemorySource {
    pub fn new(info: ContainerInfo) -> Self {
        Self {
            info,
            script: Vec::new(),
            cursor: 0,
            read_delay: None,
            reads: Arc::new(AtomicUsize::new(0)),
            interrupt: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push_packet(mut self, packet: Packet) -> Self {
        self.script.push(ScriptItem::Packet(packet));
        self
    }

    pub fn push_packets(mut self, packets: impl IntoIterator<Item = Packet>) -> Self {
        self.script.extend(packets.into_iter().map(ScriptItem::Packet));
        self
    }

    /// Queues `count` consecutive would-block results.
    pub fn push_would_block(mut self, count: usize) -> Self {
        self.script.extend(std::iter::repeat(ScriptItem::Again).take(count));
        self
    }

    /// Queues a read error. Reading past it continues with the next item.
    pub fn push_error(mut self, error: DemuxingError) -> Self {
        self.script.push(ScriptItem::Error(error));
        self
    }

    /// Makes every read take at least `delay`, simulating a slow or live input.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Shared counter of `read_packet` calls, including would-block results.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    /// Shared flag set once `close` has been called.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn sleep_interruptible(&self, delay: Duration) -> Result<(), DemuxingError> {
        const STEP: Duration = Duration::from_millis(1);
        let mut remaining = delay;
        while !remaining.is_zero() {
            if self.interrupted() {
                return Err(DemuxingError::Exit);
            }
            let step = remaining.min(STEP);
            std::thread::sleep(step);
            remaining -= step;
        }
        Ok(())
    }
}

impl PacketSource for MemorySource {
    fn open(&mut self) -> Result<ContainerInfo, DemuxingError> {
        Ok(self.info.clone())
    }

    fn read_packet(&mut self) -> Result<Packet, DemuxingError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.interrupted() {
            return Err(DemuxingError::Exit);
        }
        if let Some(delay) = self.read_delay {
            self.sleep_interruptible(delay)?;
        }
        let Some(item) = self.script.get(self.cursor) else {
            return Err(DemuxingError::EndOfFile);
        };
        self.cursor += 1;
        match item {
            ScriptItem::Packet(packet) => Ok(packet.clone()),
            ScriptItem::Again => Err(DemuxingError::Again),
            ScriptItem::Error(e) => Err(e.clone()),
        }
    }

    fn seek(
        &mut self,
        timestamp: i64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<(), DemuxingError> {
        if flags.byte {
            let target = self.script.iter().position(|item| {
                matches!(item, ScriptItem::Packet(p) if p.pos() >= timestamp)
            });
            return match target {
                Some(i) => {
                    self.cursor = i;
                    Ok(())
                }
                None => Err(DemuxingError::Other(format!("byte offset {timestamp} out of range"))),
            };
        }

        let streams = &self.info.streams;
        let candidates = self.script.iter().enumerate().filter_map(|(i, item)| {
            let ScriptItem::Packet(p) = item else { return None };
            if let Some(s) = stream_index {
                if p.stream_index() != s {
                    return None;
                }
            }
            if !flags.any && !p.is_keyframe() {
                return None;
            }
            let ts = p.dts().or(p.pts())?;
            let packet_tb = streams.get(p.stream_index())?.time_base();
            let target_tb = match stream_index {
                Some(s) => streams.get(s)?.time_base(),
                None => TIME_BASE_Q,
            };
            Some((i, compare_ts(ts, packet_tb, timestamp, target_tb)))
        });

        let mut before = None;
        let mut after = None;
        for (i, ord) in candidates {
            if ord.is_le() {
                before = Some(i);
            }
            if ord.is_ge() && after.is_none() {
                after = Some(i);
            }
        }
        let target = if flags.backward { before.or(after) } else { after.or(before) };

        match target {
            Some(i) => {
                self.cursor = i;
                Ok(())
            }
            None => Err(DemuxingError::Other(format!("no seek point for {timestamp}"))),
        }
    }

    fn set_interrupt(&mut self, interrupt: Arc<AtomicBool>) {
        self.interrupt = Some(interrupt);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
