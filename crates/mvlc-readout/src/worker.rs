//! Readout thread handing filled buffers to a consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mvlc_frame::{FrameError, ReadStatus, ReaderCounters, ReadoutBuffer, ReadoutReader};
use mvlc_transport::Pipe;
use tracing::{debug, info, warn};

use crate::error::{ReadoutError, Result};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Filled buffers that may wait for the consumer before the reader blocks.
    pub queue_depth: usize,
    /// How long the reader sleeps while the queue is full.
    pub backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            backoff: Duration::from_millis(1),
        }
    }
}

/// Requests a running worker to stop. Cloneable, e.g. for a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    closer: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl StopHandle {
    /// Set the stop flag and close the transport so a blocked read returns.
    pub fn stop(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            if let Some(close) = &self.closer {
                close();
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .field("has_closer", &self.closer.is_some())
            .finish()
    }
}

/// Owns the readout thread.
///
/// The thread runs [`ReadoutReader::read_next`] in a loop and moves each
/// filled buffer into a bounded queue. Consumers return emptied buffers with
/// [`recycle`](Self::recycle) so steady state runs without allocating.
pub struct ReadoutWorker {
    buffers: Receiver<ReadoutBuffer>,
    recycle: SyncSender<ReadoutBuffer>,
    stop: StopHandle,
    handle: Option<JoinHandle<Result<ReaderCounters>>>,
}

impl ReadoutWorker {
    /// Spawn the readout thread. Stopping relies on read timeouts only.
    pub fn spawn<P: Pipe + 'static>(reader: ReadoutReader<P>, config: WorkerConfig) -> Result<Self> {
        Self::spawn_inner(reader, config, None)
    }

    /// Spawn the readout thread with a transport closer, called once on stop.
    pub fn spawn_with_closer<P, F>(
        reader: ReadoutReader<P>,
        config: WorkerConfig,
        closer: F,
    ) -> Result<Self>
    where
        P: Pipe + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        Self::spawn_inner(reader, config, Some(Arc::new(closer)))
    }

    fn spawn_inner<P: Pipe + 'static>(
        reader: ReadoutReader<P>,
        config: WorkerConfig,
        closer: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Result<Self> {
        let depth = config.queue_depth.max(1);
        let (buffer_tx, buffer_rx) = mpsc::sync_channel(depth);
        let (recycle_tx, recycle_rx) = mpsc::sync_channel(depth + 2);
        let stop = StopHandle {
            flag: Arc::new(AtomicBool::new(false)),
            closer,
        };

        let flag = Arc::clone(&stop.flag);
        let handle = thread::Builder::new()
            .name("mvlc-readout".into())
            .spawn(move || run(reader, &config, &flag, &buffer_tx, &recycle_rx))
            .map_err(ReadoutError::Spawn)?;

        Ok(Self {
            buffers: buffer_rx,
            recycle: recycle_tx,
            stop,
            handle: Some(handle),
        })
    }

    /// Wait up to `timeout` for the next filled buffer.
    ///
    /// Returns `None` on timeout and once the thread has finished and the
    /// queue is drained.
    pub fn next_buffer(&self, timeout: Duration) -> Option<ReadoutBuffer> {
        match self.buffers.recv_timeout(timeout) {
            Ok(buffer) => Some(buffer),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// True once the thread has exited. Filled buffers may still be queued.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Give an emptied buffer back to the reader.
    pub fn recycle(&self, buffer: ReadoutBuffer) {
        // Dropped if the pool is full or the thread exited.
        let _ = self.recycle.try_send(buffer);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the thread and wait for it. Returns the reader's counters, or the
    /// transport error that ended the readout.
    pub fn stop(mut self) -> Result<ReaderCounters> {
        self.stop.stop();
        self.join()
    }

    /// Wait for the thread to end on its own, e.g. at end of stream.
    ///
    /// Buffers still queued are dropped.
    pub fn join(&mut self) -> Result<ReaderCounters> {
        let Some(handle) = self.handle.take() else {
            return Ok(ReaderCounters::default());
        };
        // Keep draining so a reader blocked on a full queue can exit.
        while !handle.is_finished() {
            let _ = self.buffers.recv_timeout(Duration::from_millis(10));
        }
        handle.join().map_err(|_| ReadoutError::WorkerPanicked)?
    }
}

impl Drop for ReadoutWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.stop();
            if let Err(err) = self.join() {
                warn!(error = %err, "readout worker ended with error");
            }
        }
    }
}

enum Step {
    Buffer,
    Idle,
    EndOfStream,
}

fn run<P: Pipe>(
    mut reader: ReadoutReader<P>,
    config: &WorkerConfig,
    stop: &AtomicBool,
    buffers: &SyncSender<ReadoutBuffer>,
    recycle: &Receiver<ReadoutBuffer>,
) -> Result<ReaderCounters> {
    info!(connection = %reader.connection_type(), "readout started");

    'outer: while !stop.load(Ordering::SeqCst) {
        let step = match reader.read_next() {
            Ok(ReadStatus::Buffer(_)) => Step::Buffer,
            Ok(ReadStatus::Idle) => Step::Idle,
            Ok(ReadStatus::EndOfStream) => Step::EndOfStream,
            Err(FrameError::Transport(err)) if stop.load(Ordering::SeqCst) => {
                debug!(error = %err, "transport closed on stop");
                break;
            }
            Err(err) => {
                warn!(error = %err, "readout failed");
                return Err(err.into());
            }
        };

        match step {
            Step::Idle => continue,
            Step::EndOfStream => {
                debug!("end of stream");
                break;
            }
            Step::Buffer => {}
        }

        let replacement = recycle.try_recv().unwrap_or_else(|_| reader.new_buffer());
        let Some(mut buffer) = reader.hand_off(replacement) else {
            continue;
        };

        loop {
            match buffers.try_send(buffer) {
                Ok(()) => break,
                Err(TrySendError::Full(returned)) => {
                    if stop.load(Ordering::SeqCst) {
                        break 'outer;
                    }
                    buffer = returned;
                    thread::sleep(config.backoff);
                }
                Err(TrySendError::Disconnected(_)) => break 'outer,
            }
        }
    }

    let counters = reader.counters().clone();
    info!(
        buffers = counters.buffers,
        bytes = counters.bytes_read,
        framing_errors = counters.framing_errors,
        "readout stopped"
    );
    Ok(counters)
}
