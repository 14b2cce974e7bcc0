//! Bounded status channel
//!
//! Progress and failure events are offered without blocking; when the
//! observer lags, new events are dropped and counted.

use super::state::SessionState;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Progress {
        state: SessionState,
        percent_captured: u8,
        triggered: bool,
    },
    DecodeFailure {
        decoder_instance: usize,
        error_text: String,
    },
    Failed {
        error_text: String,
    },
}

/// Publishing side of the status channel
#[derive(Clone)]
pub struct StatusChannel {
    tx: Sender<StatusEvent>,
    rx: Receiver<StatusEvent>,
    dropped: Arc<AtomicU64>,
}

impl StatusChannel {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = bounded(depth.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offer an event; a full channel drops it
    pub fn publish(&self, event: StatusEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("[status] Observer lagging, dropped {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn progress(&self, state: SessionState, percent_captured: u8, triggered: bool) {
        self.publish(StatusEvent::Progress {
            state,
            percent_captured,
            triggered,
        });
    }

    /// Receiver for an observer. All receivers share one queue.
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        self.rx.clone()
    }

    /// Events dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let status = StatusChannel::new(2);
        let rx = status.subscribe();
        for percent in [10, 20, 30, 40] {
            status.progress(SessionState::Capturing, percent, true);
        }
        assert_eq!(status.dropped(), 2);
        assert_eq!(
            rx.try_recv().unwrap(),
            StatusEvent::Progress {
                state: SessionState::Capturing,
                percent_captured: 10,
                triggered: true
            }
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&StatusEvent::DecodeFailure {
            decoder_instance: 1,
            error_text: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"decode_failure","decoder_instance":1,"error_text":"boom"}"#);
    }
}
