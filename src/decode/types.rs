//! Annotation record and bus settings shared by the built-in decoders

use serde::Serialize;
use std::fmt;

/// One decoded interval. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// Stack position of the decoder that produced it
    pub instance: usize,
    pub row: usize,
    pub class: &'static str,
    pub start: u64,
    pub end: u64,
    pub text: String,
    /// Decoded datum, for stacked decoders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
}

impl Annotation {
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} {}/{}: {}",
            self.start, self.end, self.instance, self.class, self.text
        )
    }
}

/// SPI clock polarity and phase modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0: Clock idle low, sample on rising edge
    Mode0,
    /// CPOL=0, CPHA=1: Clock idle low, sample on falling edge
    Mode1,
    /// CPOL=1, CPHA=0: Clock idle high, sample on falling edge
    Mode2,
    /// CPOL=1, CPHA=1: Clock idle high, sample on rising edge
    Mode3,
}

impl SpiMode {
    pub fn from_cpol_cpha(cpol: bool, cpha: bool) -> Self {
        match (cpol, cpha) {
            (false, false) => SpiMode::Mode0,
            (false, true) => SpiMode::Mode1,
            (true, false) => SpiMode::Mode2,
            (true, true) => SpiMode::Mode3,
        }
    }

    /// Whether data is sampled on the rising clock edge
    pub fn samples_on_rising(self) -> bool {
        matches!(self, SpiMode::Mode0 | SpiMode::Mode3)
    }
}

/// Chip select polarity for decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsPolarity {
    /// LOW = active, HIGH = inactive
    ActiveLow,
    ActiveHigh,
    /// CS is not connected, the bus is always selected
    Disabled,
}

impl CsPolarity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active-low" => Some(CsPolarity::ActiveLow),
            "active-high" => Some(CsPolarity::ActiveHigh),
            _ => None,
        }
    }

    #[inline]
    pub fn is_active(self, level: bool) -> bool {
        match self {
            CsPolarity::ActiveLow => !level,
            CsPolarity::ActiveHigh => level,
            CsPolarity::Disabled => true,
        }
    }
}

/// Strobe signal mode for the parallel decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrobeMode {
    RisingEdge,
    FallingEdge,
    AnyEdge,
    /// Sample on every sample where the strobe is high
    HighLevel,
    LowLevel,
}

impl StrobeMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rising" => Some(StrobeMode::RisingEdge),
            "falling" => Some(StrobeMode::FallingEdge),
            "either" => Some(StrobeMode::AnyEdge),
            "high" => Some(StrobeMode::HighLevel),
            "low" => Some(StrobeMode::LowLevel),
            _ => None,
        }
    }

    /// Whether the transition `last -> current` latches a word
    #[inline]
    pub fn latches(self, last: bool, current: bool) -> bool {
        match self {
            StrobeMode::RisingEdge => !last && current,
            StrobeMode::FallingEdge => last && !current,
            StrobeMode::AnyEdge => last != current,
            StrobeMode::HighLevel => current,
            StrobeMode::LowLevel => !current,
        }
    }
}

/// Rendering of a decoded word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Ascii,
    Dec,
    Hex,
    Oct,
    Bin,
}

impl DataFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ascii" => Some(DataFormat::Ascii),
            "dec" => Some(DataFormat::Dec),
            "hex" => Some(DataFormat::Hex),
            "oct" => Some(DataFormat::Oct),
            "bin" => Some(DataFormat::Bin),
            _ => None,
        }
    }

    /// Format `value` zero-padded to the width of a `bits`-bit word.
    /// Non-printable values fall back to bracketed hex in ASCII mode.
    pub fn format(self, value: u64, bits: usize) -> String {
        match self {
            DataFormat::Ascii => match value {
                32..=126 => char::from(value as u8).to_string(),
                _ if bits <= 8 => format!("[{:02X}]", value),
                _ => format!("[{:03X}]", value),
            },
            DataFormat::Dec => value.to_string(),
            DataFormat::Hex => format!("{:0width$X}", value, width = bits.div_ceil(4)),
            DataFormat::Oct => format!("{:0width$o}", value, width = bits.div_ceil(3)),
            DataFormat::Bin => format!("{:0width$b}", value, width = bits),
        }
    }
}
