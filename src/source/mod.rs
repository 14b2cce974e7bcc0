//! Sample sources
//!
//! A [`SampleSource`] is anything that produces a sequence of [`SampleChunk`]s
//! plus device metadata: a live device driver, a capture file, or an
//! in-memory pattern. Device enumeration and USB specifics live outside this
//! crate; drivers plug in by implementing the trait.

mod acquisition;
mod dsl_file;
mod memory;

pub use acquisition::{Acquisition, AcquisitionReport};
pub use dsl_file::{DslFileSource, DslHeader};
pub(crate) use dsl_file::format_sample_rate;
pub use memory::MemorySource;

use crate::runtime::SampleChunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Acquisition mode of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    #[default]
    Logic,
    Dso,
    Analog,
}

impl DeviceMode {
    /// Numeric code used in `.dsl` headers (`device mode = N`)
    pub fn code(self) -> u8 {
        match self {
            DeviceMode::Logic => 0,
            DeviceMode::Dso => 1,
            DeviceMode::Analog => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DeviceMode::Logic),
            1 => Some(DeviceMode::Dso),
            2 => Some(DeviceMode::Analog),
            _ => None,
        }
    }
}

/// Kind of a probe channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Digital,
    Analog,
}

/// Linear calibration for analog channels: `volts = raw * gain + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub gain: f64,
    pub offset: f64,
}

/// A probe channel. Immutable once a capture starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: usize,
    pub name: String,
    pub kind: ChannelKind,
    pub enabled: bool,
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

impl Channel {
    pub fn digital(id: usize) -> Self {
        Self {
            id,
            name: id.to_string(),
            kind: ChannelKind::Digital,
            enabled: true,
            calibration: None,
        }
    }

    pub fn analog(id: usize, calibration: Calibration) -> Self {
        Self {
            id,
            name: id.to_string(),
            kind: ChannelKind::Analog,
            enabled: true,
            calibration: Some(calibration),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Convert a raw analog reading to volts. Uncalibrated channels pass the raw value through.
    pub fn to_volts(&self, raw: u8) -> f64 {
        match self.calibration {
            Some(cal) => f64::from(raw) * cal.gain + cal.offset,
            None => f64::from(raw),
        }
    }
}

/// What a source can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Buffered capture with random access. Streaming-only sources cannot run
    /// advanced or serial triggers.
    pub supports_random_access: bool,
    /// Largest capture window the device can hold, in samples
    pub max_sample_depth: u64,
    pub channel_count: usize,
}

/// Metadata describing the stream a source produces
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub mode: DeviceMode,
    pub samplerate_hz: u64,
    pub channels: Vec<Channel>,
}

impl DeviceInfo {
    /// Bytes per sample in chunks from this device
    pub fn unit_size(&self) -> usize {
        match self.mode {
            DeviceMode::Logic => crate::runtime::logic_unit_size(self.channels.len()),
            DeviceMode::Dso | DeviceMode::Analog => self.channels.len().max(1),
        }
    }

    pub fn channel(&self, id: usize) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// Parameters handed to [`SampleSource::open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Samples per chunk
    pub chunk_samples: usize,
    /// Stop after this many samples
    pub limit_samples: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            chunk_samples: 4096,
            limit_samples: None,
        }
    }
}

/// Errors raised by sample sources
#[derive(Error, Debug)]
pub enum SourceError {
    /// Connection or hardware failure. Not retried: the user must replug or reconfigure.
    #[error("Device error: {0}")]
    Device(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid probe number: {0}")]
    InvalidProbe(usize),

    #[error("Invalid block number: {0}")]
    InvalidBlock(u64),

    #[error("Position out of bounds: {0}")]
    OutOfBounds(u64),

    #[error("Source is not open")]
    NotOpen,

    #[error("Operation needs a {expected:?} capture, source is {found:?}")]
    WrongMode { expected: DeviceMode, found: DeviceMode },
}

/// A device or file producing sample chunks
pub trait SampleSource: Send {
    /// Debug name for logging
    fn name(&self) -> &str;

    /// Prepare the source for reading
    fn open(&mut self, config: &SourceConfig) -> Result<(), SourceError>;

    /// Next chunk, or `SourceError::EndOfStream` when exhausted
    fn read_chunk(&mut self) -> Result<SampleChunk, SourceError>;

    fn capabilities(&self) -> Capabilities;

    fn device_info(&self) -> DeviceInfo;

    /// Release device resources. Default does nothing.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_mode_codes() {
        for mode in [DeviceMode::Logic, DeviceMode::Dso, DeviceMode::Analog] {
            assert_eq!(DeviceMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(DeviceMode::from_code(9), None);
    }

    #[test]
    fn test_analog_calibration() {
        let ch = Channel::analog(0, Calibration { gain: 0.5, offset: -1.0 });
        assert_eq!(ch.to_volts(10), 4.0);
        assert_eq!(Channel::digital(1).to_volts(3), 3.0);
    }

    #[test]
    fn test_unit_size_by_mode() {
        let logic = DeviceInfo {
            mode: DeviceMode::Logic,
            samplerate_hz: 1_000_000,
            channels: (0..16).map(Channel::digital).collect(),
        };
        assert_eq!(logic.unit_size(), 2);

        let analog = DeviceInfo {
            mode: DeviceMode::Analog,
            samplerate_hz: 1_000_000,
            channels: (0..2)
                .map(|i| Channel::analog(i, Calibration { gain: 1.0, offset: 0.0 }))
                .collect(),
        };
        assert_eq!(analog.unit_size(), 2);
    }
}
