//! Session coordinator
//!
//! Drives one capture: the acquisition thread feeds a drop-on-full queue,
//! the caller's thread runs the trigger matcher and capture buffer, and the
//! finished window is decoded on a worker thread.

use super::state::SessionState;
use super::status::{StatusChannel, StatusEvent};
use crate::capture::{CaptureBuffer, CaptureWindow};
use crate::config::SessionConfig;
use crate::decode::{DecodeError, DecodeReport, DecoderInstance, DecoderStack};
use crate::export::{ExportSummary, export_dsl};
use crate::runtime::{
    CancelToken, OperationGuard, QueueReceiver, SampleChunk, Watchdog, WorkError, WorkerHandle, bounded_queue,
    spawn_worker,
};
use crate::source::{Acquisition, AcquisitionReport, DeviceInfo, SampleSource, SourceError};
use crate::trigger::{MatchResult, TriggerMatcher};
use crate::{CaptureError, Result, ResultExt};
use crossbeam_channel::Receiver;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long the consumer waits for a chunk before checking again
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type DecodeJob = WorkerHandle<(DecoderStack, std::result::Result<DecodeReport, DecodeError>)>;

/// Everything that lives only while a capture is in flight
struct CaptureRun {
    matcher: TriggerMatcher,
    buffer: CaptureBuffer,
    acquisition: Option<Acquisition>,
    queue: QueueReceiver<SampleChunk>,
    samples_seen: u64,
}

/// One source, one decoder stack, one capture at a time
pub struct Session {
    source: Option<Box<dyn SampleSource>>,
    config: SessionConfig,
    state: SessionState,
    stack: DecoderStack,
    run: Option<CaptureRun>,
    decode: Option<DecodeJob>,
    window: Option<CaptureWindow>,
    report: Option<DecodeReport>,
    error: Option<Arc<CaptureError>>,
    status: StatusChannel,
    watchdog: Watchdog,
    percent: u8,
    triggered: bool,
}

impl Session {
    /// Validate `config` and create its decoders. The source is opened on arm.
    pub fn new(source: Box<dyn SampleSource>, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let mut stack = DecoderStack::new();
        for instance in &config.decoders {
            stack.push(instance.clone());
        }

        let watchdog = Watchdog::new(config.watchdog_threshold());
        if let Err(e) = watchdog.start_monitoring_thread() {
            warn!("[session] Watchdog not running: {}", e);
        }

        info!(
            "[session] Created for {} with {} decoders",
            source.name(),
            stack.len()
        );
        Ok(Self {
            source: Some(source),
            status: StatusChannel::new(config.status_depth),
            config,
            state: SessionState::Idle,
            stack,
            run: None,
            decode: None,
            window: None,
            report: None,
            error: None,
            watchdog,
            percent: 0,
            triggered: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The error that moved the session to `Error`
    pub fn error(&self) -> Option<&CaptureError> {
        self.error.as_deref()
    }

    /// The last completed capture window
    pub fn window(&self) -> Option<&CaptureWindow> {
        self.window.as_ref()
    }

    /// Annotations and per-decoder failures of the last decode
    pub fn report(&self) -> Option<&DecodeReport> {
        self.report.as_ref()
    }

    pub fn decoders(&self) -> &DecoderStack {
        &self.stack
    }

    /// Metadata of the source, unless it is busy on the acquisition thread
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.source.as_ref().map(|s| s.device_info())
    }

    /// Receiver for status events
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    /// The acquisition thread has stopped reading
    pub fn is_acquisition_finished(&self) -> bool {
        self.run
            .as_ref()
            .and_then(|run| run.acquisition.as_ref())
            .is_none_or(Acquisition::is_finished)
    }

    pub fn push_decoder(&mut self, instance: DecoderInstance) -> Result<usize> {
        if !self.state.allows_stack_changes() {
            return Err(CaptureError::Busy(self.state));
        }
        Ok(self.stack.push(instance))
    }

    pub fn pop_decoder(&mut self) -> Result<Option<DecoderInstance>> {
        if !self.state.allows_stack_changes() {
            return Err(CaptureError::Busy(self.state));
        }
        Ok(self.stack.pop())
    }

    /// Arm, capture one window and decode it
    pub fn run(&mut self) -> Result<&DecodeReport> {
        self.arm()?;
        self.capture()?;
        self.wait()
    }

    /// Check the trigger against the source, allocate the window, open the
    /// source and start acquisition. Ends in `Waiting`.
    pub fn arm(&mut self) -> Result<()> {
        if self.state == SessionState::Ready {
            self.transition(SessionState::Idle)?;
        }
        self.transition(SessionState::Arming)?;
        self.window = None;
        self.report = None;
        self.error = None;
        self.percent = 0;
        self.triggered = false;

        match self.prepare() {
            Ok(run) => {
                self.run = Some(run);
                self.transition(SessionState::Waiting)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn prepare(&mut self) -> Result<CaptureRun> {
        let config = &self.config;
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| SourceError::Device("source was lost by a failed acquisition".to_string()))?;

        let caps = source.capabilities();
        let info = source.device_info();
        config.trigger.check_capabilities(&caps, info.mode)?;
        config.trigger.validate(caps.channel_count)?;
        config.window.check_depth(caps.max_sample_depth)?;
        let matcher = TriggerMatcher::new(&config.trigger)?;
        let buffer = CaptureBuffer::new(config.buffer_options(), info).context("allocating capture window")?;

        source.open(&config.source_config())?;
        debug!("[session] Opened {}", source.name());

        let (sender, queue) = bounded_queue("acquisition", config.queue_depth);
        let queue = queue.with_watchdog(self.watchdog.register("session", "wait for samples"));
        let source = self
            .source
            .take()
            .ok_or_else(|| SourceError::Device("source was lost by a failed acquisition".to_string()))?;
        let acquisition = Acquisition::start(source, sender, CancelToken::new()).context("starting acquisition")?;

        Ok(CaptureRun {
            matcher,
            buffer,
            acquisition: Some(acquisition),
            queue,
            samples_seen: 0,
        })
    }

    /// Consume chunks until the window is complete or the source ends,
    /// then start decoding. Ends in `Decoding`, or `Ready` for an empty stack.
    pub fn capture(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Waiting | SessionState::Capturing) {
            return Err(CaptureError::Busy(self.state));
        }
        let Some(mut run) = self.run.take() else {
            return Err(CaptureError::Busy(self.state));
        };

        let consumed = self.consume(&mut run);
        let stopped = self.stop_acquisition(&mut run);
        let window = consumed
            .and(stopped)
            .and_then(|report| self.complete_window(&mut run, report));

        match window {
            Ok(window) => self.start_decode(window),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn consume(&mut self, run: &mut CaptureRun) -> Result<()> {
        while !run.buffer.is_complete() {
            match run.queue.recv_timeout(POLL_INTERVAL) {
                Ok(Some(chunk)) => self.process_chunk(run, &chunk)?,
                Ok(None) => {}
                Err(WorkError::Shutdown) => {
                    debug!("[session] Acquisition queue closed after {} samples", run.samples_seen);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn process_chunk(&mut self, run: &mut CaptureRun, chunk: &SampleChunk) -> Result<()> {
        run.samples_seen = chunk.end_position();

        if !run.buffer.is_triggered() {
            match run.matcher.feed(chunk) {
                MatchResult::Triggered(position) => {
                    run.buffer
                        .mark_triggered(position)
                        .with_context(|| format!("trigger at sample {}", position))?;
                    self.triggered = true;
                    self.transition(SessionState::Capturing)?;
                }
                MatchResult::StageAdvanced(stage) => {
                    debug!("[session] Trigger entered stage {} by sample {}", stage, run.samples_seen);
                }
                MatchResult::NoMatch => {}
            }
        }

        run.buffer
            .append(chunk)
            .with_context(|| format!("chunk {} at sample {}", chunk.sequence, chunk.start_position))?;
        run.buffer.note_overflow(run.queue.dropped());

        let percent = run.buffer.progress();
        if percent != self.percent {
            self.percent = percent;
            self.status.progress(self.state, percent, self.triggered);
        }
        Ok(())
    }

    /// Stop the producer and take the source back
    fn stop_acquisition(&mut self, run: &mut CaptureRun) -> Result<AcquisitionReport> {
        let Some(acquisition) = run.acquisition.take() else {
            return Ok(AcquisitionReport::default());
        };
        acquisition.stop();
        let (mut source, report) = acquisition.join()?;
        source.close();
        self.source = Some(source);
        Ok(report)
    }

    fn complete_window(&mut self, run: &mut CaptureRun, report: AcquisitionReport) -> Result<CaptureWindow> {
        run.buffer.note_overflow(report.chunks_dropped);

        if !run.buffer.is_complete() {
            if let Some(e) = report.error {
                return Err(CaptureError::from(e).context(format!("acquisition stopped at sample {}", run.samples_seen)));
            }
            if !run.buffer.is_triggered() {
                return Err(CaptureError::NoTrigger {
                    samples: run.samples_seen,
                });
            }
            info!("[session] Source exhausted after {} samples", run.samples_seen);
            run.buffer.mark_exhausted();
        } else if let Some(e) = report.error {
            debug!("[session] Source failed after the window was complete: {}", e);
        }

        let window = run.buffer.snapshot().context("completing capture window")?;
        if window.overflow {
            warn!(
                "[session] Window is degraded: {} chunks dropped between source and consumer",
                window.dropped_chunks
            );
        }
        info!(
            "[session] Captured {} samples ({} before trigger at {})",
            window.num_samples(),
            window.pre_trigger(),
            window.trigger_position
        );
        Ok(window)
    }

    fn start_decode(&mut self, window: CaptureWindow) -> Result<()> {
        self.transition(SessionState::Decoding)?;
        self.window = Some(window.clone());

        if self.stack.is_empty() {
            self.report = Some(DecodeReport::default());
            return self.transition(SessionState::Ready);
        }

        let mut stack = std::mem::take(&mut self.stack);
        let handle = self.watchdog.register("decode", "run stack");
        let job = spawn_worker("decode", CancelToken::new(), move |cancel| {
            let _guard = OperationGuard::new(&handle);
            let result = stack.run(&window, cancel);
            (stack, result)
        });
        match job {
            Ok(job) => {
                self.decode = Some(job);
                Ok(())
            }
            Err(e) => {
                error!("[session] Decoder stack lost, worker did not start");
                Err(self.fail(e.into()))
            }
        }
    }

    /// Block until decoding finishes. Ends in `Ready`.
    pub fn wait(&mut self) -> Result<&DecodeReport> {
        if self.state == SessionState::Decoding {
            let Some(job) = self.decode.take() else {
                return Err(CaptureError::Busy(self.state));
            };
            match job.wait() {
                Ok((stack, result)) => {
                    self.stack = stack;
                    self.finish_decode(result)?;
                }
                Err(e) => return Err(self.fail(e.into())),
            }
        }
        match (self.state, self.report.as_ref()) {
            (SessionState::Ready, Some(report)) => Ok(report),
            (state, _) => Err(CaptureError::Busy(state)),
        }
    }

    /// Wait at most `timeout` for decoding. `Ok(true)` once the session is `Ready`.
    pub fn poll_decode(&mut self, timeout: Duration) -> Result<bool> {
        if self.state != SessionState::Decoding {
            return Ok(self.state == SessionState::Ready);
        }
        let Some(job) = self.decode.as_mut() else {
            return Err(CaptureError::Busy(self.state));
        };
        match job.wait_timeout(timeout) {
            Ok(None) => Ok(false),
            Ok(Some((stack, result))) => {
                self.decode = None;
                self.stack = stack;
                self.finish_decode(result)?;
                Ok(true)
            }
            Err(e) => {
                self.decode = None;
                Err(self.fail(e.into()))
            }
        }
    }

    /// Ask the decode worker to stop; [`Session::wait`] then returns `Cancelled`
    pub fn cancel_decode(&self) {
        if let Some(job) = &self.decode {
            info!("[session] Cancelling decode");
            job.cancel();
        }
    }

    fn finish_decode(&mut self, result: std::result::Result<DecodeReport, DecodeError>) -> Result<()> {
        match result {
            Ok(report) => {
                for failure in &report.failures {
                    warn!("[session] {}", failure);
                    self.status.publish(StatusEvent::DecodeFailure {
                        decoder_instance: failure.instance().unwrap_or_default(),
                        error_text: failure.to_string(),
                    });
                }
                info!(
                    "[session] Decoded {} annotations, {} decoders failed",
                    report.annotations.len(),
                    report.failures.len()
                );
                self.report = Some(report);
                self.transition(SessionState::Ready)
            }
            Err(DecodeError::Cancelled) => {
                self.transition(SessionState::Idle)?;
                Err(DecodeError::Cancelled.into())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Abort whatever runs and return to `Idle`. The decoder stack and the
    /// last window are kept.
    pub fn stop(&mut self) {
        if let Some(mut run) = self.run.take()
            && let Err(e) = self.stop_acquisition(&mut run)
        {
            error!("[session] Acquisition did not stop cleanly: {}", e);
        }
        if let Some(job) = self.decode.take() {
            job.cancel();
            match job.wait() {
                Ok((stack, _)) => self.stack = stack,
                Err(e) => error!("[session] Decoder stack lost: {}", e),
            }
        }
        self.error = None;
        if self.state != SessionState::Idle {
            self.set_state(SessionState::Idle);
        }
    }

    /// Stop, then forget the decoder stack, window, report and error
    pub fn reset(&mut self) {
        self.stop();
        self.stack.clear();
        self.window = None;
        self.report = None;
        debug!("[session] Reset");
    }

    /// Write the last window to a `.dsl` file
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<ExportSummary> {
        let window = self.window.as_ref().ok_or(CaptureError::NoWindow)?;
        Ok(export_dsl(path, window)?)
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.set_state(next);
        Ok(())
    }

    fn set_state(&mut self, next: SessionState) {
        debug!("[session] {} -> {}", self.state, next);
        self.state = next;
        self.status.progress(next, self.percent, self.triggered);
    }

    /// Tear down the capture, enter `Error` and keep `error` for inspection
    fn fail(&mut self, error: CaptureError) -> CaptureError {
        if let Some(mut run) = self.run.take()
            && let Err(e) = self.stop_acquisition(&mut run)
        {
            error!("[session] Acquisition did not stop cleanly: {}", e);
        }
        error!("[session] {} failed: {}", self.state, error);
        self.status.publish(StatusEvent::Failed {
            error_text: error.to_string(),
        });
        self.state = SessionState::Error;
        let shared = Arc::new(error);
        self.error = Some(Arc::clone(&shared));
        CaptureError::Session(shared)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        self.watchdog.stop();
    }
}
