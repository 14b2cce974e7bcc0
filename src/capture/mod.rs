//! Capture window storage
//!
//! - [`CaptureBuffer`]: ring before the trigger, append-only after
//! - [`RleData`]: run-length encoded sample units
//! - [`CaptureWindow`]: the immutable result handed to decoders and export

mod buffer;
mod rle;
mod window;

pub use buffer::{BufferOptions, CaptureBuffer, DEFAULT_ALLOC_RETRIES};
pub use rle::RleData;
pub use window::{CaptureWindow, WindowData};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The window does not fit in memory. `transient` failures were retried
    /// `attempts` times before giving up.
    #[error("Resource error: cannot allocate {requested_bytes} bytes ({reason})")]
    Resource {
        requested_bytes: u64,
        reason: String,
        transient: bool,
        attempts: u32,
    },

    #[error("Data integrity error: expected {expected} samples, received {received}")]
    DataIntegrity { expected: u64, received: u64 },

    #[error("Malformed chunk: {0}")]
    Malformed(String),

    #[error("Trigger at {trigger} is behind already stored sample {next}")]
    TriggerBehind { trigger: u64, next: u64 },

    #[error("Buffer already triggered at {0}")]
    AlreadyTriggered(u64),

    #[error("Capture window is not complete")]
    NotComplete,

    #[error("Window of {requested} samples exceeds device depth of {max}")]
    ExceedsDepth { requested: u64, max: u64 },
}

/// Capture window size, as explicit pre/post lengths or as a total depth
/// with the trigger placed at a percentage of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowSpec {
    Split { pre_trigger: u64, post_trigger: u64 },
    Depth { depth: u64, trigger_position: u8 },
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec::Depth {
            depth: 1 << 20,
            trigger_position: 10,
        }
    }
}

impl WindowSpec {
    pub fn split_at(pre_trigger: u64, post_trigger: u64) -> Self {
        WindowSpec::Split { pre_trigger, post_trigger }
    }

    /// `(pre_trigger, post_trigger)` in samples
    pub fn split(&self) -> (u64, u64) {
        match *self {
            WindowSpec::Split { pre_trigger, post_trigger } => (pre_trigger, post_trigger),
            WindowSpec::Depth { depth, trigger_position } => {
                let percent = u64::from(trigger_position.min(100));
                let pre = (u128::from(depth) * u128::from(percent) / 100) as u64;
                (pre, depth - pre)
            }
        }
    }

    pub fn total(&self) -> u64 {
        let (pre, post) = self.split();
        pre.saturating_add(post)
    }

    /// Check the window against the device's depth
    pub fn check_depth(&self, max_sample_depth: u64) -> Result<(), BufferError> {
        let (pre, post) = self.split();
        match pre.checked_add(post) {
            Some(total) if total <= max_sample_depth => Ok(()),
            total => Err(BufferError::ExceedsDepth {
                requested: total.unwrap_or(u64::MAX),
                max: max_sample_depth,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_split() {
        let spec = WindowSpec::Depth { depth: 1000, trigger_position: 25 };
        assert_eq!(spec.split(), (250, 750));
        assert_eq!(WindowSpec::Depth { depth: 10, trigger_position: 200 }.split(), (10, 0));
        assert_eq!(WindowSpec::split_at(3, 4).total(), 7);
    }

    #[test]
    fn test_depth_limit() {
        assert!(WindowSpec::split_at(10, 10).check_depth(20).is_ok());
        assert_eq!(
            WindowSpec::split_at(10, 11).check_depth(20),
            Err(BufferError::ExceedsDepth { requested: 21, max: 20 })
        );
        assert!(WindowSpec::split_at(u64::MAX, 1).check_depth(u64::MAX).is_err());
    }

    #[test]
    fn test_window_json_forms() {
        let split: WindowSpec = serde_json::from_str(r#"{"pre_trigger": 5, "post_trigger": 10}"#).unwrap();
        assert_eq!(split, WindowSpec::split_at(5, 10));
        let depth: WindowSpec = serde_json::from_str(r#"{"depth": 100, "trigger_position": 50}"#).unwrap();
        assert_eq!(depth.split(), (50, 50));
    }
}
