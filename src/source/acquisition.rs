//! Producer thread that drains a [`SampleSource`] into the acquisition queue
//!
//! The loop never blocks on the consumer: every chunk is offered to a
//! drop-on-full queue. Dropped chunks are counted and reported, the source
//! keeps streaming.

use super::{SampleSource, SourceError};
use crate::runtime::{CancelToken, QueueSender, SampleChunk, WorkError, WorkResult, WorkerHandle, spawn_worker};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// How long the producer waits to queue the end-of-stream marker
const CLOSE_TIMEOUT: Duration = Duration::from_millis(50);

/// What the producer did before it stopped
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    pub chunks_read: u64,
    pub chunks_dropped: u64,
    pub samples_read: u64,
    /// The error that ended acquisition, if it did not end cleanly
    pub error: Option<SourceError>,
    /// Stopped on request rather than at end of stream
    pub cancelled: bool,
}

/// A running producer thread
pub struct Acquisition {
    worker: WorkerHandle<(Box<dyn SampleSource>, AcquisitionReport)>,
    finished: Arc<AtomicBool>,
}

impl Acquisition {
    /// Spawn the producer. `source` must already be open.
    pub fn start(
        mut source: Box<dyn SampleSource>,
        sender: QueueSender<SampleChunk>,
        cancel: CancelToken,
    ) -> WorkResult<Self> {
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let name = format!("acquisition:{}", source.name());

        let worker = spawn_worker(name, cancel, move |token| {
            let report = produce(source.as_mut(), &sender, token);
            sender.close(CLOSE_TIMEOUT);
            done.store(true, Ordering::Release);
            (source, report)
        })?;

        Ok(Self { worker, finished })
    }

    /// The producer has stopped reading from the source
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Ask the producer to stop after its current chunk
    pub fn stop(&self) {
        self.worker.cancel();
    }

    /// Wait for the producer and take the source back
    pub fn join(self) -> WorkResult<(Box<dyn SampleSource>, AcquisitionReport)> {
        self.worker.wait()
    }
}

fn produce(
    source: &mut dyn SampleSource,
    sender: &QueueSender<SampleChunk>,
    cancel: &CancelToken,
) -> AcquisitionReport {
    let name = source.name().to_string();
    let mut report = AcquisitionReport::default();
    info!("[acquisition] Reading from {}", name);

    loop {
        if cancel.is_cancelled() {
            debug!("[acquisition] Stop requested");
            report.cancelled = true;
            break;
        }

        match source.read_chunk() {
            Ok(chunk) => {
                report.chunks_read += 1;
                report.samples_read += chunk.num_samples as u64;
                match sender.offer(chunk) {
                    Ok(_) => {}
                    Err(WorkError::Shutdown) => {
                        debug!("[acquisition] Consumer gone, stopping");
                        break;
                    }
                    Err(e) => {
                        error!("[acquisition] Queue error: {}", e);
                        break;
                    }
                }
            }
            Err(SourceError::EndOfStream) => {
                debug!("[acquisition] End of stream from {}", name);
                break;
            }
            Err(e) => {
                error!("[acquisition] {} failed: {}", name, e);
                report.error = Some(e);
                break;
            }
        }
    }

    report.chunks_dropped = sender.dropped();
    info!(
        "[acquisition] Finished: {} chunks ({} samples), {} dropped",
        report.chunks_read, report.samples_read, report.chunks_dropped
    );
    report
}
