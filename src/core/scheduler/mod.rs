pub(crate) mod demux_task;
pub(crate) mod fanout;
pub(crate) mod ts_fixup;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::Error;
use fanout::FanoutRegistry;

pub(crate) const STATUS_IDLE: usize = 0;
pub(crate) const STATUS_RUNNING: usize = 1;
pub(crate) const STATUS_FLUSHING: usize = 2;
pub(crate) const STATUS_STOPPED: usize = 3;

/// Lifecycle of the demuxer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxStatus {
    /// Opened, nothing read yet.
    Idle,
    /// The demuxer thread is reading.
    Running,
    /// End of input reached; consumers are draining what is queued.
    Flushing,
    /// Finished, failed, or closed.
    Stopped,
}

impl From<usize> for DemuxStatus {
    fn from(status: usize) -> Self {
        match status {
            STATUS_IDLE => DemuxStatus::Idle,
            STATUS_RUNNING => DemuxStatus::Running,
            STATUS_FLUSHING => DemuxStatus::Flushing,
            _ => DemuxStatus::Stopped,
        }
    }
}

pub(crate) fn is_stopped(status: &AtomicUsize) -> bool {
    status.load(Ordering::Acquire) == STATUS_STOPPED
}

/// State shared by the demuxer thread, the `Demuxer` handle and every consumer.
pub(crate) struct DemuxShared {
    pub(crate) status: AtomicUsize,
    pub(crate) result: Mutex<Option<Error>>,
    pub(crate) registry: Mutex<FanoutRegistry>,
    /// Raised by `close`; sources poll it inside blocking reads.
    pub(crate) interrupt: Arc<AtomicBool>,
    /// Bumped after every successful seek.
    pub(crate) seek_generation: AtomicU64,
}

impl DemuxShared {
    pub(crate) fn new(queue_capacity: usize, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            status: AtomicUsize::new(STATUS_IDLE),
            result: Mutex::new(None),
            registry: Mutex::new(FanoutRegistry::new(queue_capacity)),
            interrupt,
            seek_generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn status(&self) -> DemuxStatus {
        DemuxStatus::from(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, FanoutRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Records the first fatal error and tears the queues down. Later errors
    /// are ignored.
    pub(crate) fn set_error(&self, error: Error) {
        {
            let mut result = self.result.lock().unwrap_or_else(|e| e.into_inner());
            if result.is_none() {
                *result = Some(error);
            }
        }
        self.stop(true);
    }

    /// Moves to `Stopped` and wakes every blocked consumer.
    pub(crate) fn stop(&self, discard_queued: bool) {
        self.status.store(STATUS_STOPPED, Ordering::Release);
        self.registry().close(discard_queued);
    }

    /// End of input: queued packets stay readable and the status stays
    /// `Flushing` until the demuxer is closed.
    pub(crate) fn finish(&self) {
        let _ = self.status.compare_exchange(
            STATUS_RUNNING,
            STATUS_FLUSHING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.registry().close(false);
        debug!("Demuxer queues closed");
    }
}
