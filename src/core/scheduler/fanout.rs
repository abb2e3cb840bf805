use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::debug;

use crate::core::packet::Packet;

/// Which packets a consumer wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSelector {
    /// Every packet of every stream, in container order.
    All,
    /// Only packets of the stream with this index.
    Stream(usize),
}

impl StreamSelector {
    pub fn matches(&self, stream_index: usize) -> bool {
        match self {
            StreamSelector::All => true,
            StreamSelector::Stream(index) => *index == stream_index,
        }
    }
}

/// The consumer's end of a queue.
pub(crate) struct QueueHandle {
    pub(crate) receiver: Receiver<Packet>,
    pub(crate) dropped: Arc<AtomicU64>,
}

struct ConsumerQueue {
    /// `None` once the queue is torn down; receivers then see a disconnect.
    sender: Option<Sender<Packet>>,
    /// Kept to drain the queue and to look at its fill level.
    receiver: Receiver<Packet>,
    consumers: usize,
    dropped: Arc<AtomicU64>,
}

impl ConsumerQueue {
    fn is_full(&self) -> bool {
        self.sender.is_some() && self.receiver.is_full()
    }

    fn drain(&self) -> usize {
        self.receiver.try_iter().count()
    }
}

/// Bounded per-key queues shared between the demuxer thread and its consumers.
///
/// Consumers opened with the same [`StreamSelector`] share one queue, so each
/// packet goes to exactly one of them. The queue is freed with its last
/// consumer.
pub(crate) struct FanoutRegistry {
    queues: HashMap<StreamSelector, ConsumerQueue>,
    capacity: usize,
    closed: bool,
}

impl FanoutRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            capacity,
            closed: false,
        }
    }

    pub(crate) fn attach(&mut self, selector: StreamSelector) -> QueueHandle {
        let closed = self.closed;
        let capacity = self.capacity;
        let queue = self.queues.entry(selector).or_insert_with(|| {
            let (sender, receiver) = crossbeam_channel::bounded(capacity);
            ConsumerQueue {
                // after teardown new queues start out disconnected
                sender: (!closed).then_some(sender),
                receiver,
                consumers: 0,
                dropped: Arc::new(AtomicU64::new(0)),
            }
        });
        queue.consumers += 1;
        QueueHandle {
            receiver: queue.receiver.clone(),
            dropped: queue.dropped.clone(),
        }
    }

    /// Returns `true` if that was the last consumer of any queue.
    pub(crate) fn detach(&mut self, selector: StreamSelector) -> bool {
        if let Some(queue) = self.queues.get_mut(&selector) {
            queue.consumers = queue.consumers.saturating_sub(1);
            if queue.consumers == 0 {
                if let Some(queue) = self.queues.remove(&selector) {
                    let released = queue.drain();
                    if released > 0 {
                        debug!("Released {released} queued packets of {selector:?}");
                    }
                }
            }
        }
        self.queues.is_empty()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// No queue can take another packet.
    pub(crate) fn all_full(&self) -> bool {
        !self.queues.is_empty() && self.queues.values().all(ConsumerQueue::is_full)
    }

    /// Clones `pkt` into every matching queue with room left. Full queues miss
    /// this packet. Returns the number of queues that received it.
    pub(crate) fn dispatch(&self, pkt: &Packet) -> usize {
        let mut delivered = 0;
        for (selector, queue) in &self.queues {
            if !selector.matches(pkt.stream_index()) {
                continue;
            }
            let Some(sender) = &queue.sender else {
                continue;
            };
            match sender.try_send(pkt.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    let dropped = queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        "Queue {:?} full, dropping packet of stream {} (dropped {} so far)",
                        selector,
                        pkt.stream_index(),
                        dropped
                    );
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        delivered
    }

    /// Empties every queue without closing it. Returns the packets released.
    pub(crate) fn flush(&self) -> usize {
        self.queues.values().map(ConsumerQueue::drain).sum()
    }

    /// Drops every sender so blocked receivers wake up. Buffered packets stay
    /// readable unless `discard` is set.
    pub(crate) fn close(&mut self, discard: bool) {
        self.closed = true;
        for queue in self.queues.values_mut() {
            queue.sender = None;
            if discard {
                queue.drain();
            }
        }
    }
}
