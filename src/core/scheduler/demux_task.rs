use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::core::options::DemuxOptions;
use crate::core::scheduler::ts_fixup::TsFixup;
use crate::core::scheduler::{is_stopped, DemuxShared};
use crate::core::source::{ContainerInfo, PacketSource, SeekFlags};
use crate::error::{DemuxingError, DemuxingOperationError};
use crate::util::rational::{NOPTS_VALUE, TIME_BASE};

/// Requests executed by the demuxer thread between two reads.
pub(crate) enum DemuxCommand {
    Seek {
        timestamp: i64,
        stream_index: Option<usize>,
        flags: SeekFlags,
        reply: Sender<Result<(), DemuxingError>>,
    },
}

const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(1);
const READRATE_INITIAL_BURST: f32 = 0.5;
const READRATE_SLEEP_STEP: Duration = Duration::from_millis(10);

static DEMUX_IDX: AtomicUsize = AtomicUsize::new(0);

/// Everything the demuxer thread owns: the source and all timing state.
pub(crate) struct DemuxTask {
    source: Box<dyn PacketSource>,
    fixup: TsFixup,
    nb_streams: usize,
    exit_on_error: bool,
    readrate: Option<f32>,
    retry_interval: Duration,
    commands: Receiver<DemuxCommand>,
    wallclock_start: Instant,
}

impl DemuxTask {
    pub(crate) fn new(
        source: Box<dyn PacketSource>,
        info: &ContainerInfo,
        options: &DemuxOptions,
        commands: Receiver<DemuxCommand>,
    ) -> Self {
        Self {
            source,
            fixup: TsFixup::new(info, options),
            nb_streams: info.streams.len(),
            exit_on_error: options.exit_on_error,
            readrate: options.readrate,
            retry_interval: options.retry_interval,
            commands,
            wallclock_start: Instant::now(),
        }
    }

    /// Repositions the source, then forgets everything read before the seek.
    pub(crate) fn seek(
        &mut self,
        timestamp: i64,
        stream_index: Option<usize>,
        flags: SeekFlags,
        shared: &DemuxShared,
    ) -> Result<(), DemuxingError> {
        self.source.seek(timestamp, stream_index, flags)?;

        let flushed = shared.registry().flush();
        self.fixup.reset_predictions();
        shared.seek_generation.fetch_add(1, Ordering::AcqRel);
        self.wallclock_start = Instant::now();
        debug!("Seek to {timestamp} done, released {flushed} queued packets");
        Ok(())
    }

    /// Closes a source that never got to run.
    pub(crate) fn close(mut self) {
        self.source.close();
    }

    fn handle_commands(&mut self, shared: &DemuxShared) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                DemuxCommand::Seek {
                    timestamp,
                    stream_index,
                    flags,
                    reply,
                } => {
                    let result = self.seek(timestamp, stream_index, flags, shared);
                    if let Err(e) = &result {
                        warn!("Seek to {timestamp} failed: {e}");
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Nobody to feed, or every queue is full.
    fn should_wait(shared: &DemuxShared) -> bool {
        let registry = shared.registry();
        registry.is_empty() || registry.all_full()
    }

    pub(crate) fn run(&mut self, shared: &DemuxShared) {
        self.wallclock_start = Instant::now();
        let backoff = Backoff::new();

        loop {
            if is_stopped(&shared.status) {
                info!("Demuxer receiver end command, finishing.");
                break;
            }

            self.handle_commands(shared);

            if Self::should_wait(shared) {
                if backoff.is_completed() {
                    std::thread::sleep(BACKPRESSURE_SLEEP);
                } else {
                    backoff.snooze();
                }
                continue;
            }
            backoff.reset();

            let result = self.source.read_packet();

            // closed while the read was in flight
            if is_stopped(&shared.status) {
                info!("Demuxer receiver end command, finishing.");
                break;
            }

            let mut packet = match result {
                Ok(packet) => packet,
                Err(DemuxingError::Again) => {
                    std::thread::sleep(self.retry_interval);
                    continue;
                }
                Err(DemuxingError::EndOfFile) => {
                    debug!("EOF while reading input");
                    shared.finish();
                    break;
                }
                Err(DemuxingError::Exit) => {
                    info!("Demuxer interrupted, finishing.");
                    shared.stop(true);
                    break;
                }
                Err(e) => {
                    error!("Error during demuxing: {e}");
                    shared.set_error(DemuxingOperationError::ReadFrameError(e).into());
                    break;
                }
            };

            if packet.is_corrupt() {
                if self.exit_on_error {
                    error!("corrupt input packet in stream {}", packet.stream_index());
                    shared.set_error(
                        DemuxingOperationError::CorruptPacket(packet.stream_index()).into(),
                    );
                    break;
                } else {
                    warn!("corrupt input packet in stream {}", packet.stream_index());
                }
            }

            if packet.stream_index() >= self.nb_streams {
                warn!("Incorrect stream id:{}", packet.stream_index());
                continue;
            }

            self.fixup.process(&mut packet);

            if let Some(readrate) = self.readrate {
                if readrate != 0.0 {
                    self.readrate_sleep(readrate, shared);
                }
            }

            shared.registry().dispatch(&packet);
        }

        self.source.close();
        debug!("Demuxer finished.");
    }

    fn readrate_sleep(&self, readrate: f32, shared: &DemuxShared) {
        let file_start = 0;
        let burst_until = (TIME_BASE as f32 * READRATE_INITIAL_BURST) as i64;

        for ds in self.fixup.stream_states() {
            let mut stream_ts_offset = if ds.first_dts != NOPTS_VALUE {
                ds.first_dts
            } else {
                0
            };
            stream_ts_offset = std::cmp::max(stream_ts_offset, file_start);
            let pts = ds.dts;
            if pts == NOPTS_VALUE {
                continue;
            }
            let now = ((self.wallclock_start.elapsed().as_micros() as f64 * readrate as f64)
                as i64)
                .saturating_add(stream_ts_offset);
            let ahead = pts.saturating_sub(burst_until).saturating_sub(now);
            if ahead > 0 {
                sleep_unless_stopped(Duration::from_micros(ahead as u64), shared);
            }
        }
    }
}

fn sleep_unless_stopped(duration: Duration, shared: &DemuxShared) {
    let deadline = Instant::now() + duration;
    loop {
        if is_stopped(&shared.status) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(READRATE_SLEEP_STEP));
    }
}

/// Spawns the demuxer thread. It runs until end of input, a fatal error, or
/// until the status becomes stopped, and closes the source on its way out.
pub(crate) fn demux_init(
    task: DemuxTask,
    format_name: &str,
    shared: Arc<DemuxShared>,
) -> crate::error::Result<JoinHandle<()>> {
    let demux_idx = DEMUX_IDX.fetch_add(1, Ordering::Relaxed);

    let result = std::thread::Builder::new()
        .name(format!("demuxer{demux_idx}:{format_name}"))
        .spawn(move || {
            let mut task = task;
            let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(&shared)));
            if result.is_err() {
                error!("Demuxer thread panicked, shutting down consumers.");
                shared.set_error(DemuxingOperationError::ThreadExited.into());
                let _ = panic::catch_unwind(AssertUnwindSafe(|| task.source.close()));
            }
        });

    match result {
        Ok(handle) => Ok(handle),
        Err(e) => {
            error!("Demuxer thread exited with error: {e}");
            Err(DemuxingOperationError::ThreadExited.into())
        }
    }
}
