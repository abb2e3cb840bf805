use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use log::{debug, error, info};

use crate::core::consumer::Consumer;
use crate::core::options::DemuxOptions;
use crate::core::scheduler::demux_task::{demux_init, DemuxCommand, DemuxTask};
use crate::core::scheduler::fanout::StreamSelector;
use crate::core::scheduler::{
    is_stopped, DemuxShared, DemuxStatus, STATUS_IDLE, STATUS_RUNNING,
};
use crate::core::source::{ContainerInfo, PacketSource, SeekFlags};
use crate::core::stream_info::StreamInfo;
use crate::error::{ConsumerError, DemuxingOperationError, OpenInputError, Result};

/// An opened input whose packets are read by one background thread and handed
/// out to any number of [`Consumer`]s.
///
/// Every packet goes through wrap-around correction, discontinuity handling
/// and next-DTS prediction exactly once, on the demuxer thread, before it is
/// cloned into the queues of the consumers that want it.
///
/// Reading starts with the first [`Consumer::receive`] (or [`Demuxer::start`]),
/// so every consumer opened before that sees the input from its beginning.
/// Dropping the `Demuxer` closes it.
///
/// ```rust,ignore
/// let demuxer = Demuxer::open(source, DemuxOptions::new())?;
/// let mut video = demuxer.open_consumer(StreamSelector::Stream(0))?;
/// while let Some(packet) = video.receive()? {
///     println!("pts={:?} size={}", packet.pts(), packet.size());
/// }
/// ```
pub struct Demuxer {
    inner: Arc<DemuxInner>,
}

pub(crate) struct DemuxInner {
    info: ContainerInfo,
    options: DemuxOptions,
    pub(crate) shared: Arc<DemuxShared>,
    pending: Mutex<Option<DemuxTask>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    commands: Sender<DemuxCommand>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Demuxer {
    /// Validates `options`, opens `source` and prepares (but does not start)
    /// the demuxer thread.
    pub fn open<S>(source: S, options: DemuxOptions) -> Result<Demuxer>
    where
        S: PacketSource + 'static,
    {
        options.validate()?;

        let mut source: Box<dyn PacketSource> = Box::new(source);
        let info = source.open().map_err(OpenInputError::Source)?;

        if info.streams.is_empty() {
            source.close();
            return Err(OpenInputError::NoStreams.into());
        }
        if let Some((position, stream)) = info
            .streams
            .iter()
            .enumerate()
            .find(|(position, stream)| stream.index() != *position)
        {
            source.close();
            return Err(OpenInputError::InvalidSource(format!(
                "stream at position {position} reports index {}",
                stream.index()
            ))
            .into());
        }

        let interrupt = Arc::new(AtomicBool::new(false));
        source.set_interrupt(interrupt.clone());

        let (commands, command_receiver) = crossbeam_channel::unbounded();
        let task = DemuxTask::new(source, &info, &options, command_receiver);
        let shared = Arc::new(DemuxShared::new(options.queue_capacity, interrupt));

        debug!(
            "Opened input '{}' with {} streams",
            info.format_name,
            info.streams.len()
        );

        Ok(Demuxer {
            inner: Arc::new(DemuxInner {
                info,
                options,
                shared,
                pending: Mutex::new(Some(task)),
                handle: Mutex::new(None),
                commands,
            }),
        })
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.inner.info.streams
    }

    pub fn container_info(&self) -> &ContainerInfo {
        &self.inner.info
    }

    pub fn format_name(&self) -> &str {
        &self.inner.info.format_name
    }

    pub fn options(&self) -> &DemuxOptions {
        &self.inner.options
    }

    pub fn status(&self) -> DemuxStatus {
        self.inner.shared.status()
    }

    /// Registers a new consumer. Consumers opened with the same selector
    /// share one queue; each packet is then received by only one of them.
    pub fn open_consumer(&self, selector: StreamSelector) -> Result<Consumer> {
        if let StreamSelector::Stream(index) = selector {
            self.inner.check_stream(index)?;
        }
        let handle = self.inner.shared.registry().attach(selector);
        Ok(Consumer::new(self.inner.clone(), selector, handle))
    }

    /// Starts the demuxer thread if it is not running yet.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Repositions the input.
    ///
    /// `timestamp` is in the time base of `stream_index`, or in microseconds
    /// when no stream is given. Once running, the seek is carried out by the
    /// demuxer thread between two reads; queued packets are discarded and
    /// timestamp prediction starts over, while the accumulated discontinuity
    /// offset is kept.
    pub fn seek(&self, timestamp: i64, stream_index: Option<usize>, flags: SeekFlags) -> Result<()> {
        if let Some(index) = stream_index {
            self.inner.check_stream(index)?;
        }

        {
            let mut pending = lock(&self.inner.pending);
            if let Some(task) = pending.as_mut() {
                return task
                    .seek(timestamp, stream_index, flags, &self.inner.shared)
                    .map_err(|e| DemuxingOperationError::SeekError(e).into());
            }
        }

        if self.status() != DemuxStatus::Running {
            return Err(DemuxingOperationError::Stopped.into());
        }

        let (reply, reply_receiver) = crossbeam_channel::bounded(1);
        self.inner
            .commands
            .send(DemuxCommand::Seek {
                timestamp,
                stream_index,
                flags,
                reply,
            })
            .map_err(|_| DemuxingOperationError::Stopped)?;

        match reply_receiver.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DemuxingOperationError::SeekError(e).into()),
            Err(_) => Err(DemuxingOperationError::Stopped.into()),
        }
    }

    /// Stops reading, wakes every blocked consumer with end-of-stream, and
    /// waits for the demuxer thread to exit. Queued packets are released.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl DemuxInner {
    pub(crate) fn info(&self) -> &ContainerInfo {
        &self.info
    }

    pub(crate) fn options(&self) -> &DemuxOptions {
        &self.options
    }

    fn check_stream(&self, index: usize) -> Result<()> {
        if index >= self.info.streams.len() {
            return Err(ConsumerError::UnknownStream(index).into());
        }
        Ok(())
    }

    pub(crate) fn start(&self) -> Result<()> {
        let mut pending = lock(&self.pending);
        let Some(task) = pending.take() else {
            return Ok(());
        };

        if self
            .shared
            .status
            .compare_exchange(STATUS_IDLE, STATUS_RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            task.close();
            return Ok(());
        }

        match demux_init(task, &self.info.format_name, self.shared.clone()) {
            Ok(handle) => {
                *lock(&self.handle) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_error(e.clone());
                Err(e)
            }
        }
    }

    /// Called when a consumer goes away. The last one stops a running demuxer.
    pub(crate) fn detach(&self, selector: StreamSelector) {
        let last = self.shared.registry().detach(selector);
        if last && self.shared.status() == DemuxStatus::Running {
            info!("Last consumer detached, stopping demuxer.");
            self.shared.interrupt.store(true, Ordering::Release);
            self.shared.stop(true);
        }
    }

    fn close(&self) {
        self.shared.interrupt.store(true, Ordering::Release);
        if !is_stopped(&self.shared.status) {
            debug!("Closing demuxer for '{}'", self.info.format_name);
        }
        self.shared.stop(true);

        if let Some(task) = lock(&self.pending).take() {
            task.close();
        }

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Demuxer thread panicked");
            }
        }
    }
}
