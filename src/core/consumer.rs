use std::iter::FusedIterator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::core::demuxer::DemuxInner;
use crate::core::packet::Packet;
use crate::core::scheduler::fanout::{QueueHandle, StreamSelector};
use crate::core::stream_info::StreamInfo;
use crate::error::Result;

/// Outcome of a non-blocking receive.
#[derive(Debug, Clone, PartialEq)]
pub enum TryReceive {
    Packet(Packet),
    /// Nothing queued right now; the demuxer is still running.
    Empty,
    /// The input is exhausted or the demuxer was closed.
    EndOfStream,
}

/// Holds back video packets until the first keyframe of their stream.
#[derive(Debug, Clone)]
struct KeyframeGate {
    initial: Vec<bool>,
    waiting: Vec<bool>,
}

impl KeyframeGate {
    fn new(streams: &[StreamInfo], enabled: bool) -> Self {
        let initial: Vec<bool> = streams.iter().map(|s| enabled && s.is_video()).collect();
        Self {
            waiting: initial.clone(),
            initial,
        }
    }

    fn admit(&mut self, pkt: &Packet) -> bool {
        match self.waiting.get_mut(pkt.stream_index()) {
            Some(waiting) if *waiting => {
                if pkt.is_keyframe() {
                    *waiting = false;
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    fn reset(&mut self) {
        self.waiting.clone_from(&self.initial);
    }
}

/// One reader of a [`Demuxer`](crate::Demuxer)'s packets.
///
/// Blocks only on its own queue. Dropping a consumer detaches it; when the
/// last consumer of a running demuxer goes away, the demuxer stops.
pub struct Consumer {
    inner: Arc<DemuxInner>,
    selector: StreamSelector,
    receiver: Receiver<Packet>,
    dropped: Arc<AtomicU64>,
    gate: KeyframeGate,
    seek_generation: u64,
}

impl Consumer {
    pub(crate) fn new(inner: Arc<DemuxInner>, selector: StreamSelector, handle: QueueHandle) -> Self {
        let gate = KeyframeGate::new(&inner.info().streams, inner.options().start_with_keyframe());
        let seek_generation = inner.shared.seek_generation.load(Ordering::Acquire);
        Self {
            inner,
            selector,
            receiver: handle.receiver,
            dropped: handle.dropped,
            gate,
            seek_generation,
        }
    }

    pub fn selector(&self) -> StreamSelector {
        self.selector
    }

    /// Packets this consumer missed because its queue was full.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Packets waiting in this consumer's queue.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Waits for the next packet.
    ///
    /// Returns `Ok(None)` at end of stream and the demuxer's error if it
    /// failed. Both outcomes are terminal. Starts the demuxer if needed.
    pub fn receive(&mut self) -> Result<Option<Packet>> {
        self.inner.start()?;
        loop {
            if let Some(e) = self.inner.shared.error() {
                return Err(e);
            }
            match self.receiver.recv() {
                Ok(pkt) => {
                    if let Some(pkt) = self.admit(pkt) {
                        return Ok(Some(pkt));
                    }
                }
                Err(_) => return self.end_of_stream(),
            }
        }
    }

    /// Like [`receive`](Self::receive), but gives up after `timeout` with
    /// [`TryReceive::Empty`].
    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<TryReceive> {
        self.inner.start()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(e) = self.inner.shared.error() {
                return Err(e);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(pkt) => {
                    if let Some(pkt) = self.admit(pkt) {
                        return Ok(TryReceive::Packet(pkt));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(TryReceive::Empty),
                Err(RecvTimeoutError::Disconnected) => {
                    return self.end_of_stream().map(|_| TryReceive::EndOfStream)
                }
            }
        }
    }

    /// Returns immediately with whatever is queued.
    pub fn try_receive(&mut self) -> Result<TryReceive> {
        self.inner.start()?;
        loop {
            if let Some(e) = self.inner.shared.error() {
                return Err(e);
            }
            match self.receiver.try_recv() {
                Ok(pkt) => {
                    if let Some(pkt) = self.admit(pkt) {
                        return Ok(TryReceive::Packet(pkt));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(TryReceive::Empty),
                Err(TryRecvError::Disconnected) => {
                    return self.end_of_stream().map(|_| TryReceive::EndOfStream)
                }
            }
        }
    }

    /// Iterator over the remaining packets.
    ///
    /// Yields `Result<Packet>` until end of stream or an error. The iterator is
    /// fused: after returning `None` or `Err`, it always returns `None`.
    pub fn packets(&mut self) -> PacketIter<'_> {
        PacketIter {
            consumer: self,
            done: false,
        }
    }

    fn admit(&mut self, pkt: Packet) -> Option<Packet> {
        let generation = self.inner.shared.seek_generation.load(Ordering::Acquire);
        if generation != self.seek_generation {
            self.seek_generation = generation;
            self.gate.reset();
        }
        self.gate.admit(&pkt).then_some(pkt)
    }

    fn end_of_stream(&self) -> Result<Option<Packet>> {
        match self.inner.shared.error() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.inner.detach(self.selector);
    }
}

/// Iterator wrapper for [`Consumer`].
pub struct PacketIter<'a> {
    consumer: &'a mut Consumer,
    done: bool,
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.consumer.receive() {
            Ok(Some(pkt)) => Some(Ok(pkt)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> FusedIterator for PacketIter<'a> {}
