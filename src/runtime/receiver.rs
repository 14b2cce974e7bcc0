//! Consumer half of the acquisition queue
//!
//! [`QueueReceiver`] wraps a `crossbeam_channel::Receiver<ChannelMessage<T>>`,
//! transparently unwraps `ChannelMessage` and caches end-of-stream state so
//! subsequent calls return `Shutdown`. Blocking receives are tracked by the
//! watchdog.

use crossbeam_channel::{Receiver as CrossbeamReceiver, RecvTimeoutError, bounded};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::errors::{WorkError, WorkResult};
use super::sender::{ChannelMessage, QueueSender, QueueStats};
use super::watchdog::{OperationGuard, WatchdogHandle};

/// Create a single-producer/single-consumer queue holding at most `depth` items.
///
/// A depth of zero is raised to one: a rendezvous channel would drop every
/// offer that does not meet a waiting consumer.
pub fn bounded_queue<T>(name: impl Into<String>, depth: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let name = name.into();
    let (tx, rx) = bounded::<ChannelMessage<T>>(depth.max(1));
    let stats = Arc::new(QueueStats::default());
    (
        QueueSender::new(tx, Arc::clone(&stats), name),
        QueueReceiver {
            receiver: rx,
            stats,
            watchdog_handle: None,
            eos: false,
        },
    )
}

/// Receiving end of a bounded queue
pub struct QueueReceiver<T> {
    receiver: CrossbeamReceiver<ChannelMessage<T>>,
    stats: Arc<QueueStats>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: bool,
}

impl<T> QueueReceiver<T> {
    /// Attach a watchdog handle to monitor blocking receives
    pub fn with_watchdog(mut self, watchdog_handle: WatchdogHandle) -> Self {
        self.watchdog_handle = Some(watchdog_handle);
        self
    }

    /// Blocking receive.
    ///
    /// Returns `Err(WorkError::Shutdown)` once end-of-stream has been seen
    /// (now or in a previous call) or the producer disconnected.
    pub fn recv(&mut self) -> WorkResult<T> {
        if self.eos {
            return Err(WorkError::Shutdown);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.receiver.recv() {
            Ok(ChannelMessage::Item(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos = true;
                tracing::debug!("QueueReceiver::recv() - EndOfStream received");
                Err(WorkError::Shutdown)
            }
            Err(_) => {
                self.eos = true;
                tracing::debug!("QueueReceiver::recv() - producer disconnected, returning Shutdown");
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Receive with a timeout. `Ok(None)` means nothing arrived in time.
    pub fn recv_timeout(&mut self, timeout: Duration) -> WorkResult<Option<T>> {
        if self.eos {
            return Err(WorkError::Shutdown);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.receiver.recv_timeout(timeout) {
            Ok(ChannelMessage::Item(item)) => Ok(Some(item)),
            Ok(ChannelMessage::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                self.eos = true;
                Err(WorkError::Shutdown)
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
        }
    }

    /// Non-blocking receive. `Ok(None)` means the queue is currently empty.
    pub fn try_recv(&mut self) -> WorkResult<Option<T>> {
        if self.eos {
            return Err(WorkError::Shutdown);
        }
        match self.receiver.try_recv() {
            Ok(ChannelMessage::Item(item)) => Ok(Some(item)),
            Ok(ChannelMessage::EndOfStream) | Err(crossbeam_channel::TryRecvError::Disconnected) => {
                self.eos = true;
                Err(WorkError::Shutdown)
            }
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
        }
    }

    /// Whether end-of-stream has been observed
    pub fn is_finished(&self) -> bool {
        self.eos
    }

    /// Items currently waiting in the queue
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Number of items the producer had to drop so far
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}
