//! Producer half of the acquisition queue
//!
//! The acquisition path must never wait on the consumer: a live device keeps
//! streaming whether or not anyone reads, so a full queue drops the new chunk
//! and counts it instead of blocking.

use crossbeam_channel::{Sender as CrossbeamSender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::{WorkError, WorkResult};

/// Channel message wrapper for end-of-stream signaling
///
/// `QueueSender::offer()` wraps values in `Item(T)` and `QueueReceiver::recv()`
/// unwraps them, so callers never see this enum.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    /// A queued value
    Item(T),
    /// End-of-stream marker: the producer is done
    EndOfStream,
}

/// Outcome of a non-blocking offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The value is in the queue
    Queued,
    /// The queue was full; the value was discarded
    Dropped,
}

/// Counters shared between both halves of a queue
#[derive(Debug, Default)]
pub(crate) struct QueueStats {
    pub(crate) offered: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

/// Drop-on-full sender for a single-producer/single-consumer queue
pub struct QueueSender<T> {
    inner: CrossbeamSender<ChannelMessage<T>>,
    stats: Arc<QueueStats>,
    name: String,
}

impl<T> QueueSender<T> {
    pub(crate) fn new(
        inner: CrossbeamSender<ChannelMessage<T>>,
        stats: Arc<QueueStats>,
        name: String,
    ) -> Self {
        Self { inner, stats, name }
    }

    /// Offer a value without blocking.
    ///
    /// A full queue drops `value` and bumps the shared drop counter.
    /// Returns `WorkError::Shutdown` once the consumer has gone away.
    pub fn offer(&self, value: T) -> WorkResult<Offer> {
        self.stats.offered.fetch_add(1, Ordering::Relaxed);
        match self.inner.try_send(ChannelMessage::Item(value)) {
            Ok(()) => Ok(Offer::Queued),
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    warn!("[{}] Queue full, dropping data (consumer is falling behind)", self.name);
                } else {
                    debug!("[{}] Queue full, {} items dropped so far", self.name, dropped);
                }
                Ok(Offer::Dropped)
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("[{}] Consumer disconnected", self.name);
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Signal end-of-stream.
    ///
    /// Waits at most `timeout` for room in the queue. If the marker cannot be
    /// queued, dropping the sender still disconnects the channel, which the
    /// receiver treats the same way.
    pub fn close(self, timeout: Duration) {
        if self
            .inner
            .send_timeout(ChannelMessage::EndOfStream, timeout)
            .is_err()
        {
            debug!("[{}] End-of-stream marker not queued, disconnecting", self.name);
        }
    }

    /// Number of values dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Number of values offered, queued or not
    pub fn offered(&self) -> u64 {
        self.stats.offered.load(Ordering::Relaxed)
    }

    /// Configured queue depth
    pub fn capacity(&self) -> usize {
        self.inner.capacity().unwrap_or(0)
    }
}
