//! Session configuration
//!
//! Sessions are described in JSON, in the same spirit as DSView session
//! files. Every field has a default, so `{}` is a valid configuration:
//!
//! ```json
//! {
//!   "queue_depth": 16,
//!   "window": { "pre_trigger": 1000, "post_trigger": 9000 },
//!   "trigger": { "mode": "simple", "pattern": "X R" },
//!   "decoders": [
//!     { "decoder": "uart", "channels": { "rx": 0 }, "options": { "baudrate": 9600 } }
//!   ]
//! }
//! ```

use crate::capture::{BufferOptions, DEFAULT_ALLOC_RETRIES, WindowSpec};
use crate::decode::DecoderInstance;
use crate::source::SourceConfig;
use crate::trigger::{TriggerConfig, TriggerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid trigger: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Everything a [`Session`](crate::Session) needs besides its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Chunks the acquisition queue holds before dropping
    pub queue_depth: usize,
    /// Samples per chunk requested from the source
    pub chunk_samples: usize,
    /// Stop reading the source after this many samples
    pub limit_samples: Option<u64>,
    pub window: WindowSpec,
    /// Run-length encode the post-trigger samples
    pub rle: bool,
    /// Largest window allocation in bytes
    pub memory_limit: Option<u64>,
    /// Attempts for transient allocation failures
    pub alloc_retries: u32,
    pub watchdog_threshold_ms: u64,
    /// Status events held for a lagging observer
    pub status_depth: usize,
    pub trigger: TriggerConfig,
    pub decoders: Vec<DecoderInstance>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_depth: 16,
            chunk_samples: SourceConfig::default().chunk_samples,
            limit_samples: None,
            window: WindowSpec::default(),
            rle: false,
            memory_limit: None,
            alloc_retries: DEFAULT_ALLOC_RETRIES,
            watchdog_threshold_ms: 1000,
            status_depth: 64,
            trigger: TriggerConfig::default(),
            decoders: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading session config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that need no device. Channel bounds and depth limits are
    /// checked against the source when the session arms.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(invalid("queue_depth", "must be at least 1"));
        }
        if self.chunk_samples == 0 {
            return Err(invalid("chunk_samples", "must be at least 1"));
        }
        if self.alloc_retries == 0 {
            return Err(invalid("alloc_retries", "must be at least 1"));
        }
        if self.status_depth == 0 {
            return Err(invalid("status_depth", "must be at least 1"));
        }
        if self.limit_samples == Some(0) {
            return Err(invalid("limit_samples", "must be at least 1 when set"));
        }
        if let WindowSpec::Depth { trigger_position, .. } = self.window
            && trigger_position > 100
        {
            return Err(invalid(
                "window",
                format!("trigger position {}% is past the end of the window", trigger_position),
            ));
        }
        let (_, post) = self.window.split();
        if post == 0 {
            return Err(invalid("window", "needs at least one post-trigger sample"));
        }
        self.trigger.validate(usize::MAX)?;
        for (index, decoder) in self.decoders.iter().enumerate() {
            if decoder.decoder.is_empty() {
                return Err(invalid("decoders", format!("entry {} has no decoder id", index)));
            }
        }
        Ok(())
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_chunk_samples(mut self, samples: usize) -> Self {
        self.chunk_samples = samples;
        self
    }

    pub fn with_limit_samples(mut self, limit: u64) -> Self {
        self.limit_samples = Some(limit);
        self
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.window = window;
        self
    }

    pub fn with_rle(mut self, rle: bool) -> Self {
        self.rle = rle;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_alloc_retries(mut self, retries: u32) -> Self {
        self.alloc_retries = retries;
        self
    }

    pub fn with_watchdog_threshold(mut self, threshold: Duration) -> Self {
        self.watchdog_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_status_depth(mut self, depth: usize) -> Self {
        self.status_depth = depth;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderInstance) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            chunk_samples: self.chunk_samples,
            limit_samples: self.limit_samples,
        }
    }

    pub fn buffer_options(&self) -> BufferOptions {
        BufferOptions::from_window(&self.window)
            .with_rle(self.rle)
            .with_memory_limit(self.memory_limit)
            .with_alloc_retries(self.alloc_retries)
    }

    pub fn watchdog_threshold(&self) -> Duration {
        Duration::from_millis(self.watchdog_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::OptionValue;
    use crate::trigger::{StageKind, TriggerStage};

    #[test]
    fn test_empty_object_is_default() {
        let config = SessionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.alloc_retries, 3);
    }

    #[test]
    fn test_full_session_file() {
        let json = r#"{
            "queue_depth": 8,
            "window": { "pre_trigger": 100, "post_trigger": 900 },
            "rle": true,
            "memory_limit": 65536,
            "trigger": {
                "mode": "advanced",
                "stages": [
                    { "pattern": "X R", "count": 2 },
                    { "pattern": "1 X", "kind": "contiguous" }
                ]
            },
            "decoders": [
                { "decoder": "uart", "channels": { "rx": 0 }, "options": { "baudrate": 9600 } },
                { "decoder": "text" }
            ]
        }"#;
        let config = SessionConfig::from_json_str(json).unwrap();
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.window.split(), (100, 900));
        assert_eq!(config.memory_limit, Some(65536));
        assert_eq!(config.decoders.len(), 2);
        assert_eq!(config.decoders[0].options.get("baudrate"), Some(&OptionValue::Int(9600)));

        let TriggerConfig::Advanced { stages } = &config.trigger else {
            panic!("expected advanced trigger, got {:?}", config.trigger);
        };
        assert_eq!(stages[0].count, 2);
        assert_eq!(stages[1].kind, StageKind::Contiguous);

        let options = config.buffer_options();
        assert!(options.rle);
        assert_eq!(options.post_trigger, 900);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SessionConfig::new()
            .with_queue_depth(4)
            .with_window(WindowSpec::split_at(0, 40))
            .with_trigger(TriggerConfig::advanced(vec![TriggerStage::parse("R").unwrap()]))
            .with_decoder(DecoderInstance::new("spi").with_channel("clk", 0));
        let json = config.to_json_string().unwrap();
        assert_eq!(SessionConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            SessionConfig::new().with_queue_depth(0).validate(),
            Err(ConfigError::Invalid { field: "queue_depth", .. })
        ));
        assert!(matches!(
            SessionConfig::new().with_window(WindowSpec::split_at(10, 0)).validate(),
            Err(ConfigError::Invalid { field: "window", .. })
        ));
        assert!(matches!(
            SessionConfig::new().with_trigger(TriggerConfig::advanced(Vec::new())).validate(),
            Err(ConfigError::Trigger(TriggerError::NoStages))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"queue_depth": "many"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join(format!("dslcap_no_such_config_{}.json", std::process::id()));
        assert!(matches!(SessionConfig::from_json_file(path), Err(ConfigError::Io(_))));
    }
}
