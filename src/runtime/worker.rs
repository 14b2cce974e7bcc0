//! Background worker threads with cooperative cancellation
//!
//! A worker runs one closure on its own named thread and reports the result
//! over a completion channel, so callers can poll, wait with a timeout, or
//! cancel it. Cancellation is cooperative: the closure receives the
//! [`CancelToken`] and is expected to check it.

use crossbeam_channel::{Receiver as CrossbeamReceiver, RecvTimeoutError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

use super::errors::{WorkError, WorkResult};

/// Shared cancellation flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(WorkError::Cancelled)` once cancellation was requested
    #[inline]
    pub fn check(&self) -> WorkResult<()> {
        if self.is_cancelled() {
            Err(WorkError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handle to a running worker
pub struct WorkerHandle<R> {
    name: String,
    cancel: CancelToken,
    completion_rx: CrossbeamReceiver<R>,
    thread: Option<JoinHandle<()>>,
}

/// Spawn `job` on a dedicated thread named `name`.
pub fn spawn_worker<R, F>(name: impl Into<String>, cancel: CancelToken, job: F) -> WorkResult<WorkerHandle<R>>
where
    R: Send + 'static,
    F: FnOnce(&CancelToken) -> R + Send + 'static,
{
    let name = name.into();
    let (completion_tx, completion_rx) = bounded(1);
    let token = cancel.clone();
    let thread_name = name.clone();

    debug!("[{}] Starting worker", name);
    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let result = job(&token);
            if completion_tx.send(result).is_err() {
                debug!("[{}] Result discarded, handle dropped", thread_name);
            }
        })
        .map_err(|e| WorkError::Worker(format!("failed to spawn {}: {}", name, e)))?;

    Ok(WorkerHandle {
        name,
        cancel,
        completion_rx,
        thread: Some(thread),
    })
}

impl<R> WorkerHandle<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Block until the worker finishes
    pub fn wait(mut self) -> WorkResult<R> {
        let result = self.completion_rx.recv();
        self.join();
        result.map_err(|_| WorkError::Panicked(self.name.clone()))
    }

    /// Wait at most `timeout`. `Ok(None)` means the worker is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> WorkResult<Option<R>> {
        match self.completion_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                Ok(Some(result))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Err(WorkError::Panicked(self.name.clone()))
            }
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("[{}] Worker thread panicked", self.name);
        }
    }
}

impl<R> Drop for WorkerHandle<R> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
            self.join();
        }
    }
}
