//! Trigger configuration and real-time matching
//!
//! Three modes are supported:
//! - **simple**: one pattern, fires on the first matching sample
//! - **advanced**: up to [`MAX_STAGES`] stages evaluated in order, each with
//!   its own threshold and counting rule
//! - **serial**: a clocked shift register compared against a value/mask
//!
//! Advanced and serial triggers need a source with buffered random access;
//! requesting them against a streaming-only source fails before any I/O.

mod matcher;
mod serial;
mod stage;

pub use matcher::{MatchResult, TriggerMatcher};
pub use serial::{ClockEdge, SerialTrigger};
pub use stage::{Combinator, Pattern, StageKind, Term, TriggerStage};

use crate::source::{Capabilities, DeviceMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Most stages an advanced trigger may have
pub const MAX_STAGES: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Invalid trigger term '{0}' (expected one of 0 1 X R F C)")]
    InvalidTerm(char),

    #[error("Advanced trigger needs at least one stage")]
    NoStages,

    #[error("Advanced trigger has {0} stages, at most {max} are supported", max = MAX_STAGES)]
    TooManyStages(usize),

    #[error("Stage {stage} has a zero match count")]
    ZeroCount { stage: usize },

    #[error("Trigger references channel {channel} but the device has {channels}")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("Serial trigger width must be 1-64 bits, got {0}")]
    InvalidBits(u8),

    /// The source cannot run the requested trigger
    #[error("Capability error: {0}")]
    Capability(String),
}

/// Trigger settings as stored in session files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// One implicit stage with threshold 1. An empty pattern fires immediately.
    Simple {
        #[serde(default)]
        pattern: Pattern,
    },
    Advanced { stages: Vec<TriggerStage> },
    Serial(SerialTrigger),
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

impl TriggerConfig {
    /// Fire on the first sample
    pub fn immediate() -> Self {
        TriggerConfig::Simple { pattern: Pattern::any() }
    }

    pub fn simple(pattern: Pattern) -> Self {
        TriggerConfig::Simple { pattern }
    }

    pub fn advanced(stages: Vec<TriggerStage>) -> Self {
        TriggerConfig::Advanced { stages }
    }

    pub fn serial(serial: SerialTrigger) -> Self {
        TriggerConfig::Serial(serial)
    }

    /// Whether this trigger needs buffered random access on the device
    pub fn requires_random_access(&self) -> bool {
        matches!(self, TriggerConfig::Advanced { .. } | TriggerConfig::Serial(_))
    }

    /// Stages the matcher walks through (serial triggers have none)
    pub fn stages(&self) -> Vec<TriggerStage> {
        match self {
            TriggerConfig::Simple { pattern } => vec![TriggerStage::new(pattern.clone())],
            TriggerConfig::Advanced { stages } => stages.clone(),
            TriggerConfig::Serial(_) => Vec::new(),
        }
    }

    /// Structural checks against the device's channel count
    pub fn validate(&self, channel_count: usize) -> Result<(), TriggerError> {
        match self {
            TriggerConfig::Simple { pattern } => check_pattern(pattern, channel_count),
            TriggerConfig::Advanced { stages } => {
                if stages.is_empty() {
                    return Err(TriggerError::NoStages);
                }
                if stages.len() > MAX_STAGES {
                    return Err(TriggerError::TooManyStages(stages.len()));
                }
                for (index, stage) in stages.iter().enumerate() {
                    if stage.count == 0 {
                        return Err(TriggerError::ZeroCount { stage: index });
                    }
                    check_pattern(&stage.pattern, channel_count)?;
                }
                Ok(())
            }
            TriggerConfig::Serial(serial) => serial.validate(channel_count),
        }
    }

    /// Reject triggers the source or the acquisition mode cannot run
    pub fn check_capabilities(&self, caps: &Capabilities, mode: DeviceMode) -> Result<(), TriggerError> {
        if self.requires_random_access() && !caps.supports_random_access {
            return Err(TriggerError::Capability(format!(
                "{} trigger needs buffered capture, the source is streaming-only",
                self.mode_name()
            )));
        }
        if mode != DeviceMode::Logic && !self.is_immediate() {
            return Err(TriggerError::Capability(format!(
                "{} trigger is only available in logic mode",
                self.mode_name()
            )));
        }
        Ok(())
    }

    fn is_immediate(&self) -> bool {
        matches!(self, TriggerConfig::Simple { pattern } if pattern.is_any())
    }

    fn mode_name(&self) -> &'static str {
        match self {
            TriggerConfig::Simple { .. } => "simple",
            TriggerConfig::Advanced { .. } => "advanced",
            TriggerConfig::Serial(_) => "serial",
        }
    }
}

fn check_pattern(pattern: &Pattern, channel_count: usize) -> Result<(), TriggerError> {
    match pattern.highest_channel() {
        Some(channel) if channel >= channel_count || channel >= 64 => {
            Err(TriggerError::ChannelOutOfRange { channel, channels: channel_count })
        }
        _ => Ok(()),
    }
}
