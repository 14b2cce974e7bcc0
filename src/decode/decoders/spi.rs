//! SPI decoder, edge-by-edge over the clock channel
//!
//! Flow per word:
//!   1. Track chip select across clock edges; a new CS assertion starts a
//!      new transaction and drops any partial word
//!   2. On each sampling edge inside an asserted CS, read MOSI/MISO at
//!      the edge sample
//!   3. After `wordsize` bits, emit one annotation per data line

use super::FORMATS;
use crate::decode::definition::{
    AnnotationClass, AnnotationRow, ChannelSpec, DecoderDefinition, DecoderOptions, InputKind, OptionDefault,
    OptionSpec, OptionValues,
};
use crate::decode::{AnnotationSink, CsPolarity, DataFormat, DecodeError, Decoder, DecoderInput, SpiMode};
use tracing::{debug, trace};

pub(crate) static DEFINITION: DecoderDefinition = DecoderDefinition {
    id: "spi",
    name: "SPI",
    longname: "Serial Peripheral Interface",
    desc: "Full-duplex, synchronous, serial bus.",
    input: InputKind::Logic,
    channels: &[ChannelSpec {
        id: "clk",
        name: "CLK",
        desc: "Clock",
    }],
    optional_channels: &[
        ChannelSpec { id: "miso", name: "MISO", desc: "Master in, slave out" },
        ChannelSpec { id: "mosi", name: "MOSI", desc: "Master out, slave in" },
        ChannelSpec { id: "cs", name: "CS#", desc: "Chip-select" },
    ],
    options: &[
        OptionSpec {
            id: "cs_polarity",
            desc: "CS# polarity",
            default: OptionDefault::Str("active-low"),
            values: OptionValues::Choices(&["active-low", "active-high"]),
        },
        OptionSpec {
            id: "cpol",
            desc: "Clock polarity",
            default: OptionDefault::Int(0),
            values: OptionValues::Range(0, 1),
        },
        OptionSpec {
            id: "cpha",
            desc: "Clock phase",
            default: OptionDefault::Int(0),
            values: OptionValues::Range(0, 1),
        },
        OptionSpec {
            id: "bitorder",
            desc: "Bit order",
            default: OptionDefault::Str("msb-first"),
            values: OptionValues::Choices(&["msb-first", "lsb-first"]),
        },
        OptionSpec {
            id: "wordsize",
            desc: "Word size",
            default: OptionDefault::Int(8),
            values: OptionValues::Range(1, 64),
        },
        OptionSpec {
            id: "format",
            desc: "Data format",
            default: OptionDefault::Str("hex"),
            values: OptionValues::Choices(FORMATS),
        },
    ],
    annotations: &[
        AnnotationClass { id: "mosi-data", desc: "MOSI data" },
        AnnotationClass { id: "miso-data", desc: "MISO data" },
        AnnotationClass { id: "warnings", desc: "Warnings" },
    ],
    rows: &[
        AnnotationRow { id: "miso-data", desc: "MISO data", classes: &[1] },
        AnnotationRow { id: "mosi-data", desc: "MOSI data", classes: &[0] },
        AnnotationRow { id: "warnings", desc: "Warnings", classes: &[2] },
    ],
};

pub(crate) struct Spi {
    mode: SpiMode,
    cs_polarity: CsPolarity,
    bits_per_word: usize,
    msb_first: bool,
    format: DataFormat,
    tx_count: u64,
}

pub(crate) fn create(options: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
    let cs_polarity = CsPolarity::parse(options.str("cs_polarity"))
        .ok_or_else(|| format!("invalid CS polarity '{}'", options.str("cs_polarity")))?;
    let format =
        DataFormat::parse(options.str("format")).ok_or_else(|| format!("invalid format '{}'", options.str("format")))?;
    Ok(Box::new(Spi {
        mode: SpiMode::from_cpol_cpha(options.int("cpol") == 1, options.int("cpha") == 1),
        cs_polarity,
        bits_per_word: options.int("wordsize") as usize,
        msb_first: options.str("bitorder") == "msb-first",
        format,
        tx_count: 0,
    }))
}

/// Word being shifted in
#[derive(Default)]
struct Word {
    mosi: u64,
    miso: u64,
    bits: usize,
    first_edge: u64,
}

impl Decoder for Spi {
    fn reset(&mut self) {
        self.tx_count = 0;
    }

    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        let has_mosi = input.has_channel("mosi");
        let has_miso = input.has_channel("miso");
        if !has_mosi && !has_miso {
            return Err(input.error(0, "either MISO or MOSI (or both) must be bound"));
        }

        let cs_polarity = if input.has_channel("cs") {
            self.cs_polarity
        } else {
            CsPolarity::Disabled
        };
        let sample_on_rising = self.mode.samples_on_rising();
        let bits_per_word = self.bits_per_word;

        let clk = input.edges("clk");
        let cs = input.edges("cs");
        let mut cs_next = 0usize;
        let mut cs_level = false;
        // Incremented on every CS assertion
        let mut transaction = 0u64;
        let mut word_transaction = 0u64;
        let mut word = Word::default();

        for edge in clk.iter().skip(1) {
            while let Some(cs_edge) = cs.get(cs_next)
                && cs_edge.position <= edge.position
            {
                cs_level = cs_edge.value;
                if cs_polarity.is_active(cs_level) {
                    transaction += 1;
                }
                cs_next += 1;
            }

            if !cs_polarity.is_active(cs_level) || transaction != word_transaction {
                if word.bits > 0 {
                    debug!("[spi] Incomplete word: {}/{} bits", word.bits, bits_per_word);
                    out.put(word.first_edge, edge.position, "warnings", "Incomplete word")?;
                }
                word = Word::default();
                word_transaction = transaction;
                if !cs_polarity.is_active(cs_level) {
                    continue;
                }
            }

            if edge.value != sample_on_rising {
                continue;
            }

            let sample = edge.position;
            if word.bits == 0 {
                word.first_edge = sample;
            }
            let shift = if self.msb_first {
                bits_per_word - 1 - word.bits
            } else {
                word.bits
            };
            if input.level_at("mosi", sample).unwrap_or(false) {
                word.mosi |= 1 << shift;
            }
            if input.level_at("miso", sample).unwrap_or(false) {
                word.miso |= 1 << shift;
            }
            trace!("[spi] bit {} at {}", word.bits, sample);

            word.bits += 1;
            if word.bits < bits_per_word {
                continue;
            }

            input.check_cancelled()?;
            let end = sample + 1;
            if has_mosi {
                out.put_value(
                    word.first_edge,
                    end,
                    "mosi-data",
                    self.format.format(word.mosi, bits_per_word),
                    word.mosi,
                )?;
            }
            if has_miso {
                out.put_value(
                    word.first_edge,
                    end,
                    "miso-data",
                    self.format.format(word.miso, bits_per_word),
                    word.miso,
                )?;
            }
            self.tx_count += 1;
            debug!("[spi] #{}: 0x{:X} at {}", self.tx_count, word.mosi, word.first_edge);
            word = Word::default();
        }

        if word.bits > 0 {
            debug!("[spi] Incomplete word at window end: {}/{} bits", word.bits, bits_per_word);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{logic_window, run};
    use crate::decode::DecoderInstance;

    const CLK: u64 = 1;
    const MOSI: u64 = 2;
    const MISO: u64 = 4;
    const CS: u64 = 8;

    /// Mode 0 transfer: CS low, data set while CLK low, sampled on the rise
    fn transfer(mosi: &[u8], miso: &[u8]) -> Vec<u64> {
        let mut samples = vec![CS, CS];
        for (&m, &s) in mosi.iter().zip(miso) {
            for bit in (0..8).rev() {
                let data = if (m >> bit) & 1 == 1 { MOSI } else { 0 } | if (s >> bit) & 1 == 1 { MISO } else { 0 };
                samples.push(data);
                samples.push(data | CLK);
            }
        }
        samples.extend([0, CS, CS]);
        samples
    }

    fn spi() -> DecoderInstance {
        DecoderInstance::new("spi")
            .with_channel("clk", 0)
            .with_channel("mosi", 1)
            .with_channel("miso", 2)
            .with_channel("cs", 3)
    }

    #[test]
    fn test_mode0_full_duplex() {
        let window = logic_window(4, 1_000_000, &transfer(&[0xA5, 0x3C], &[0x0F, 0xF0]));
        let report = run(vec![spi()], &window);
        assert!(report.is_success());

        let mosi: Vec<&str> = report
            .annotations
            .iter()
            .filter(|a| a.class == "mosi-data")
            .map(|a| a.text.as_str())
            .collect();
        let miso: Vec<Option<u64>> = report
            .annotations
            .iter()
            .filter(|a| a.class == "miso-data")
            .map(|a| a.value)
            .collect();
        assert_eq!(mosi, vec!["A5", "3C"]);
        assert_eq!(miso, vec![Some(0x0F), Some(0xF0)]);

        // MISO row sorts before MOSI row
        assert_eq!(report.annotations[0].class, "miso-data");
        assert_eq!(report.annotations[0].start, 3);
        assert_eq!(report.annotations[0].end, 18);
    }

    #[test]
    fn test_cs_deassert_drops_partial_word() {
        let mut samples = transfer(&[0xFF], &[0]);
        samples.truncate(2 + 8); // four bits, then CS goes high
        samples.extend([CS, CS]);
        samples.extend(transfer(&[0x81], &[0]));
        let window = logic_window(4, 1_000_000, &samples);
        let report = run(vec![spi()], &window);

        let words: Vec<Option<u64>> = report
            .annotations
            .iter()
            .filter(|a| a.class == "mosi-data")
            .map(|a| a.value)
            .collect();
        assert_eq!(words, vec![Some(0x81)]);
        assert_eq!(report.annotations.iter().filter(|a| a.class == "warnings").count(), 1);
    }

    #[test]
    fn test_without_cs_and_lsb_first() {
        let samples: Vec<u64> = transfer(&[0x01], &[0]).into_iter().map(|v| v & !CS).collect();
        let window = logic_window(4, 1_000_000, &samples);
        let report = run(
            vec![
                DecoderInstance::new("spi")
                    .with_channel("clk", 0)
                    .with_channel("mosi", 1)
                    .with_option("bitorder", "lsb-first"),
            ],
            &window,
        );
        assert_eq!(report.annotations.len(), 1);
        assert_eq!(report.annotations[0].value, Some(0x80));
    }

    #[test]
    fn test_needs_a_data_line() {
        let window = logic_window(4, 1_000_000, &transfer(&[1], &[1]));
        let report = run(vec![DecoderInstance::new("spi").with_channel("clk", 0)], &window);
        assert!(report.failure(0).is_some());
    }
}
