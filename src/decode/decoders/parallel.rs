//! Parallel bus decoder
//!
//! Latches `d0..dN` on the configured strobe condition, optionally gated by
//! an enable line. Each word spans from its latch sample to the next one.

use super::FORMATS;
use crate::decode::definition::{
    AnnotationClass, AnnotationRow, ChannelSpec, DecoderDefinition, DecoderOptions, InputKind, OptionDefault,
    OptionSpec, OptionValues,
};
use crate::decode::{AnnotationSink, CsPolarity, DataFormat, DecodeError, Decoder, DecoderInput, StrobeMode};
use tracing::{debug, trace};

const DATA_ROLES: [&str; 16] = [
    "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9", "d10", "d11", "d12", "d13", "d14", "d15",
];

const fn data_line(id: &'static str, name: &'static str) -> ChannelSpec {
    ChannelSpec {
        id,
        name,
        desc: "Data line",
    }
}

pub(crate) static DEFINITION: DecoderDefinition = DecoderDefinition {
    id: "parallel",
    name: "Parallel",
    longname: "Parallel sync bus",
    desc: "Generic parallel synchronous bus.",
    input: InputKind::Logic,
    channels: &[
        ChannelSpec { id: "clk", name: "CLK", desc: "Clock line" },
        data_line("d0", "D0"),
    ],
    optional_channels: &[
        data_line("d1", "D1"),
        data_line("d2", "D2"),
        data_line("d3", "D3"),
        data_line("d4", "D4"),
        data_line("d5", "D5"),
        data_line("d6", "D6"),
        data_line("d7", "D7"),
        data_line("d8", "D8"),
        data_line("d9", "D9"),
        data_line("d10", "D10"),
        data_line("d11", "D11"),
        data_line("d12", "D12"),
        data_line("d13", "D13"),
        data_line("d14", "D14"),
        data_line("d15", "D15"),
        ChannelSpec { id: "enable", name: "EN", desc: "Enable line" },
    ],
    options: &[
        OptionSpec {
            id: "clock_edge",
            desc: "Clock edge to sample on",
            default: OptionDefault::Str("rising"),
            values: OptionValues::Choices(&["rising", "falling", "either", "high", "low"]),
        },
        OptionSpec {
            id: "enable_polarity",
            desc: "Enable polarity",
            default: OptionDefault::Str("active-low"),
            values: OptionValues::Choices(&["active-low", "active-high"]),
        },
        OptionSpec {
            id: "format",
            desc: "Data format",
            default: OptionDefault::Str("hex"),
            values: OptionValues::Choices(FORMATS),
        },
    ],
    annotations: &[
        AnnotationClass { id: "data", desc: "Data word" },
    ],
    rows: &[AnnotationRow { id: "words", desc: "Words", classes: &[0] }],
};

pub(crate) struct Parallel {
    mode: StrobeMode,
    enable_polarity: CsPolarity,
    format: DataFormat,
    words: u64,
}

pub(crate) fn create(options: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
    let mode = StrobeMode::parse(options.str("clock_edge"))
        .ok_or_else(|| format!("invalid clock edge '{}'", options.str("clock_edge")))?;
    let enable_polarity = CsPolarity::parse(options.str("enable_polarity"))
        .ok_or_else(|| format!("invalid enable polarity '{}'", options.str("enable_polarity")))?;
    let format =
        DataFormat::parse(options.str("format")).ok_or_else(|| format!("invalid format '{}'", options.str("format")))?;
    Ok(Box::new(Parallel {
        mode,
        enable_polarity,
        format,
        words: 0,
    }))
}

impl Parallel {
    fn is_level_mode(&self) -> bool {
        matches!(self.mode, StrobeMode::HighLevel | StrobeMode::LowLevel)
    }
}

impl Decoder for Parallel {
    fn reset(&mut self) {
        self.words = 0;
    }

    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        let lines: Vec<(usize, &str)> = DATA_ROLES
            .iter()
            .enumerate()
            .filter(|(_, role)| input.has_channel(role))
            .map(|(bit, role)| (bit, *role))
            .collect();
        let width = lines.last().map_or(1, |(bit, _)| bit + 1);
        let enable_polarity = if input.has_channel("enable") {
            self.enable_polarity
        } else {
            CsPolarity::Disabled
        };

        // Edge modes only look at clock changes; level modes also latch when
        // the data changes while the clock sits at the active level.
        let mut positions: Vec<u64> = input.edges("clk").iter().skip(1).map(|e| e.position).collect();
        if self.is_level_mode() {
            positions.push(0);
            for (_, role) in &lines {
                positions.extend(input.edges(role).iter().skip(1).map(|e| e.position));
            }
            positions.sort_unstable();
            positions.dedup();
        }

        let word_at = |position: u64| {
            lines.iter().fold(0u64, |word, (bit, role)| {
                word | (u64::from(input.level_at(role, position).unwrap_or(false)) << bit)
            })
        };

        let mut pending: Option<(u64, u64)> = None;
        let mut last_word: Option<u64> = None;

        for position in positions {
            let current = input.level_at("clk", position).unwrap_or(false);
            let last = match position.checked_sub(1) {
                Some(prev) => input.level_at("clk", prev).unwrap_or(false),
                None => !current,
            };
            if !self.mode.latches(last, current) {
                continue;
            }
            if !enable_polarity.is_active(input.level_at("enable", position).unwrap_or(false)) {
                trace!("[parallel] Strobe at {} while disabled", position);
                continue;
            }

            let word = word_at(position);
            let clock_entered = self.mode.latches(!current, current) && last != current;
            if self.is_level_mode() && !clock_entered && last_word == Some(word) {
                continue;
            }

            if let Some((start, value)) = pending.take() {
                out.put_value(start, position, "data", self.format.format(value, width), value)?;
            }
            pending = Some((position, word));
            last_word = Some(word);
            self.words += 1;
        }

        if let Some((start, value)) = pending {
            let end = input.num_samples().max(start + 1);
            out.put_value(start, end, "data", self.format.format(value, width), value)?;
        }
        debug!("[parallel] Latched {} words of {} bits", self.words, width);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{logic_window, run};
    use crate::decode::DecoderInstance;

    fn parallel(bits: usize) -> DecoderInstance {
        (0..bits).fold(DecoderInstance::new("parallel").with_channel("clk", 0), |inst, bit| {
            inst.with_channel(format!("d{}", bit), bit + 1)
        })
    }

    /// ch0 = clock, ch1..=4 = data nibble
    fn bus(words: &[u64]) -> Vec<u64> {
        words.iter().flat_map(|w| [w << 1, (w << 1) | 1]).chain([0]).collect()
    }

    fn values(report: &crate::decode::DecodeReport) -> Vec<u64> {
        report.annotations.iter().filter_map(|a| a.value).collect()
    }

    #[test]
    fn test_rising_edge_latch() {
        let window = logic_window(5, 1_000_000, &bus(&[0x3, 0xA, 0xF]));
        let report = run(vec![parallel(4)], &window);
        assert_eq!(values(&report), vec![0x3, 0xA, 0xF]);
        assert_eq!(report.annotations[0].start, 1);
        assert_eq!(report.annotations[0].end, 3);
        assert_eq!(report.annotations[2].end, 7);
        assert_eq!(report.annotations[1].text, "A");
    }

    #[test]
    fn test_falling_edge_and_enable_gate() {
        // enable on ch5, active-low; third word is masked
        let mut samples = bus(&[0x1, 0x2, 0x4]);
        samples[4] |= 1 << 5;
        samples[5] |= 1 << 5;
        samples[6] |= 1 << 5;
        let window = logic_window(6, 1_000_000, &samples);
        let report = run(
            vec![parallel(4).with_channel("enable", 5).with_option("clock_edge", "falling")],
            &window,
        );
        // falling edges at 2, 4 and 6 latch the following setup values
        assert_eq!(values(&report), vec![0x2]);
    }

    #[test]
    fn test_level_mode_tracks_data_changes() {
        // clock held high, data changes twice
        let samples = vec![0b0001, 0b0011, 0b0011, 0b0101, 0b0000];
        let window = logic_window(3, 1_000_000, &samples);
        let report = run(
            vec![
                DecoderInstance::new("parallel")
                    .with_channel("clk", 0)
                    .with_channel("d0", 1)
                    .with_channel("d1", 2)
                    .with_option("clock_edge", "high"),
            ],
            &window,
        );
        assert_eq!(values(&report), vec![0, 1, 2]);
    }
}
