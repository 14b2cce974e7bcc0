//! I²C decoder
//!
//! START and STOP are SDA transitions while SCL is high; data bits are
//! sampled on SCL rising edges, MSB first, followed by the ACK bit.

use crate::decode::definition::{
    AnnotationClass, AnnotationRow, ChannelSpec, DecoderDefinition, DecoderOptions, InputKind, OptionDefault,
    OptionSpec, OptionValues,
};
use crate::decode::{AnnotationSink, DecodeError, Decoder, DecoderInput};
use tracing::debug;

pub(crate) static DEFINITION: DecoderDefinition = DecoderDefinition {
    id: "i2c",
    name: "I²C",
    longname: "Inter-Integrated Circuit",
    desc: "Two-wire, multi-master, serial bus.",
    input: InputKind::Logic,
    channels: &[
        ChannelSpec { id: "scl", name: "SCL", desc: "Serial clock line" },
        ChannelSpec { id: "sda", name: "SDA", desc: "Serial data line" },
    ],
    optional_channels: &[],
    options: &[OptionSpec {
        id: "address_format",
        desc: "Displayed slave address format",
        default: OptionDefault::Str("shifted"),
        values: OptionValues::Choices(&["shifted", "unshifted"]),
    }],
    annotations: &[
        AnnotationClass { id: "start", desc: "Start condition" },
        AnnotationClass { id: "repeat-start", desc: "Repeat start condition" },
        AnnotationClass { id: "stop", desc: "Stop condition" },
        AnnotationClass { id: "ack", desc: "ACK" },
        AnnotationClass { id: "nack", desc: "NACK" },
        AnnotationClass { id: "address-read", desc: "Address read" },
        AnnotationClass { id: "address-write", desc: "Address write" },
        AnnotationClass { id: "data-read", desc: "Data read" },
        AnnotationClass { id: "data-write", desc: "Data write" },
        AnnotationClass { id: "warnings", desc: "Human-readable warnings" },
    ],
    rows: &[
        AnnotationRow {
            id: "addr-data",
            desc: "Address/Data",
            classes: &[0, 1, 2, 3, 4, 5, 6, 7, 8],
        },
        AnnotationRow { id: "warnings", desc: "Warnings", classes: &[9] },
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Address,
    Data,
}

pub(crate) struct I2c {
    shifted: bool,
    state: State,
    is_read: bool,
    byte: u64,
    bits: u32,
    byte_start: u64,
}

pub(crate) fn create(options: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
    Ok(Box::new(I2c {
        shifted: options.str("address_format") == "shifted",
        state: State::Idle,
        is_read: false,
        byte: 0,
        bits: 0,
        byte_start: 0,
    }))
}

impl I2c {
    fn on_clock(&mut self, position: u64, sda: bool, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        if self.state == State::Idle {
            return Ok(());
        }
        if self.bits < 8 {
            if self.bits == 0 {
                self.byte_start = position;
                self.byte = 0;
            }
            self.byte = (self.byte << 1) | u64::from(sda);
            self.bits += 1;
            return Ok(());
        }

        // Ninth clock is the ACK bit
        if self.state == State::Address {
            self.is_read = self.byte & 1 == 1;
            let (class, address) = match (self.is_read, self.shifted) {
                (true, true) => ("address-read", self.byte >> 1),
                (false, true) => ("address-write", self.byte >> 1),
                (true, false) => ("address-read", self.byte),
                (false, false) => ("address-write", self.byte),
            };
            let text = format!("Address {}: {:02X}", if self.is_read { "read" } else { "write" }, address);
            out.put_value(self.byte_start, position, class, text, address)?;
            self.state = State::Data;
        } else {
            let (class, dir) = if self.is_read {
                ("data-read", "read")
            } else {
                ("data-write", "write")
            };
            out.put_value(
                self.byte_start,
                position,
                class,
                format!("Data {}: {:02X}", dir, self.byte),
                self.byte,
            )?;
        }

        if sda {
            out.put(position, position + 1, "nack", "NACK")?;
        } else {
            out.put(position, position + 1, "ack", "ACK")?;
        }
        self.bits = 0;
        Ok(())
    }

    fn on_start(&mut self, position: u64, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        if self.state == State::Idle {
            out.put(position, position + 1, "start", "Start")?;
        } else {
            self.warn_partial(position, out)?;
            out.put(position, position + 1, "repeat-start", "Start repeat")?;
        }
        self.state = State::Address;
        self.bits = 0;
        Ok(())
    }

    fn on_stop(&mut self, position: u64, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        if self.state == State::Idle {
            return Ok(());
        }
        self.warn_partial(position, out)?;
        out.put(position, position + 1, "stop", "Stop")?;
        self.state = State::Idle;
        self.bits = 0;
        Ok(())
    }

    /// A START or STOP normally follows one setup clock; more bits than
    /// that means a byte was cut short.
    fn warn_partial(&mut self, position: u64, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        if self.bits > 1 {
            debug!("[i2c] Byte interrupted after {} bits at {}", self.bits, position);
            out.put(self.byte_start, position, "warnings", "Incomplete byte")?;
        }
        Ok(())
    }
}

impl Decoder for I2c {
    fn reset(&mut self) {
        self.state = State::Idle;
        self.bits = 0;
        self.byte = 0;
        self.is_read = false;
    }

    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        let mut positions: Vec<u64> = input
            .edges("scl")
            .into_iter()
            .chain(input.edges("sda"))
            .map(|e| e.position)
            .filter(|&p| p > 0)
            .collect();
        positions.sort_unstable();
        positions.dedup();

        for position in positions {
            let (Some(scl_prev), Some(scl), Some(sda_prev), Some(sda)) = (
                input.level_at("scl", position - 1),
                input.level_at("scl", position),
                input.level_at("sda", position - 1),
                input.level_at("sda", position),
            ) else {
                continue;
            };

            if scl_prev && scl && sda_prev && !sda {
                self.on_start(position, out)?;
            } else if scl_prev && scl && !sda_prev && sda {
                self.on_stop(position, out)?;
            } else if !scl_prev && scl {
                self.on_clock(position, sda, out)?;
            }
        }
        Ok(())
    }
}
