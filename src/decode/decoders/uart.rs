//! UART decoder
//!
//! Finds start bits on the idle-to-active transition and samples every bit
//! in the middle of its slot. Data words go to the `data` row, start,
//! parity and stop bits to the `bits` row, framing problems to `warnings`.

use super::{FORMATS, YES_NO};
use crate::decode::definition::{
    AnnotationClass, AnnotationRow, ChannelSpec, DecoderDefinition, DecoderOptions, InputKind, OptionDefault,
    OptionSpec, OptionValues,
};
use crate::decode::{AnnotationSink, DataFormat, DecodeError, Decoder, DecoderInput};
use tracing::debug;

pub(crate) static DEFINITION: DecoderDefinition = DecoderDefinition {
    id: "uart",
    name: "UART",
    longname: "Universal Asynchronous Receiver/Transmitter",
    desc: "Asynchronous, serial bus.",
    input: InputKind::Logic,
    channels: &[ChannelSpec {
        id: "rxtx",
        name: "RX/TX",
        desc: "UART transceive line",
    }],
    optional_channels: &[],
    options: &[
        OptionSpec {
            id: "baudrate",
            desc: "Baud rate",
            default: OptionDefault::Int(115_200),
            values: OptionValues::Range(1, 1_000_000_000),
        },
        OptionSpec {
            id: "num_data_bits",
            desc: "Data bits",
            default: OptionDefault::Int(8),
            values: OptionValues::Range(4, 64),
        },
        OptionSpec {
            id: "parity_type",
            desc: "Parity type",
            default: OptionDefault::Str("none"),
            values: OptionValues::Choices(&["none", "odd", "even", "zero", "one"]),
        },
        OptionSpec {
            id: "parity_check",
            desc: "Check parity?",
            default: OptionDefault::Str("yes"),
            values: OptionValues::Choices(YES_NO),
        },
        OptionSpec {
            id: "num_stop_bits",
            desc: "Stop bits",
            default: OptionDefault::Float(1.0),
            values: OptionValues::Steps(&[0.0, 0.5, 1.0, 1.5, 2.0, 2.5]),
        },
        OptionSpec {
            id: "bit_order",
            desc: "Bit order",
            default: OptionDefault::Str("lsb-first"),
            values: OptionValues::Choices(&["lsb-first", "msb-first"]),
        },
        OptionSpec {
            id: "format",
            desc: "Data format",
            default: OptionDefault::Str("hex"),
            values: OptionValues::Choices(FORMATS),
        },
        OptionSpec {
            id: "invert",
            desc: "Invert signal?",
            default: OptionDefault::Str("no"),
            values: OptionValues::Choices(YES_NO),
        },
    ],
    annotations: &[
        AnnotationClass { id: "data", desc: "data" },
        AnnotationClass { id: "start", desc: "start bits" },
        AnnotationClass { id: "parity-ok", desc: "parity OK bits" },
        AnnotationClass { id: "parity-err", desc: "parity error bits" },
        AnnotationClass { id: "stop", desc: "stop bits" },
        AnnotationClass { id: "warnings", desc: "warnings" },
    ],
    rows: &[
        AnnotationRow { id: "data", desc: "RX/TX", classes: &[0] },
        AnnotationRow { id: "bits", desc: "Bits", classes: &[1, 2, 3, 4] },
        AnnotationRow { id: "warnings", desc: "Warnings", classes: &[5] },
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parity {
    None,
    Odd,
    Even,
    Zero,
    One,
}

impl Parity {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Parity::None),
            "odd" => Some(Parity::Odd),
            "even" => Some(Parity::Even),
            "zero" => Some(Parity::Zero),
            "one" => Some(Parity::One),
            _ => None,
        }
    }

    fn ok(self, bit: bool, data: u64) -> bool {
        let ones = data.count_ones() + u32::from(bit);
        match self {
            Parity::None => true,
            Parity::Zero => !bit,
            Parity::One => bit,
            Parity::Odd => ones % 2 == 1,
            Parity::Even => ones % 2 == 0,
        }
    }
}

/// Data annotation held back until the next frame start is known
struct PendingWord {
    start: u64,
    end: u64,
    text: String,
    value: u64,
}

impl PendingWord {
    fn emit(self, out: &mut AnnotationSink<'_>, limit: u64) -> Result<(), DecodeError> {
        out.put_value(self.start, self.end.min(limit), "data", self.text, self.value)
    }
}

pub(crate) struct Uart {
    baudrate: u64,
    data_bits: usize,
    parity: Parity,
    check_parity: bool,
    stop_bits: f64,
    msb_first: bool,
    format: DataFormat,
    invert: bool,
    frames: u64,
}

pub(crate) fn create(options: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
    let parity = Parity::parse(options.str("parity_type"))
        .ok_or_else(|| format!("invalid parity type '{}'", options.str("parity_type")))?;
    let format =
        DataFormat::parse(options.str("format")).ok_or_else(|| format!("invalid format '{}'", options.str("format")))?;
    Ok(Box::new(Uart {
        baudrate: options.int("baudrate").max(1) as u64,
        data_bits: options.int("num_data_bits") as usize,
        parity,
        check_parity: options.flag("parity_check"),
        stop_bits: options.float("num_stop_bits"),
        msb_first: options.str("bit_order") == "msb-first",
        format,
        invert: options.flag("invert"),
        frames: 0,
    }))
}

impl Decoder for Uart {
    fn reset(&mut self) {
        self.frames = 0;
    }

    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        let samplerate = input.samplerate_hz();
        if samplerate == 0 {
            return Err(input.error(0, "cannot decode without samplerate"));
        }
        let bit_width = samplerate as f64 / self.baudrate as f64;
        if bit_width < 1.0 {
            return Err(input.error(
                0,
                format!("baud rate {} is above the sample rate {}", self.baudrate, samplerate),
            ));
        }

        let num_samples = input.num_samples();
        let parity_bits = usize::from(self.parity != Parity::None);
        let stop_bitnum = 1 + self.data_bits + parity_bits;
        let frame_bits = (1 + self.data_bits + parity_bits) as f64 + self.stop_bits;
        let level = |index: u64| input.level_at("rxtx", index).map(|v| v != self.invert);

        let mut next_free = 0u64;
        let mut pending: Option<PendingWord> = None;

        for edge in input.edges("rxtx").iter().skip(1) {
            // Start bit begins where the line leaves idle
            if (edge.value != self.invert) || edge.position < next_free {
                continue;
            }
            input.check_cancelled()?;

            let frame_start = edge.position;
            let origin = frame_start as f64 + (bit_width - 1.0) / 2.0;
            let sample_point = |bitnum: usize| (origin + bitnum as f64 * bit_width).ceil() as u64;
            let slot_start = |bitnum: usize| frame_start + (bitnum as f64 * bit_width).floor() as u64;

            let stop_point = sample_point(stop_bitnum);
            if stop_point >= num_samples {
                debug!("[uart] Frame at {} runs past the window end", frame_start);
                break;
            }

            if let Some(word) = pending.take() {
                word.emit(out, frame_start)?;
            }

            let start_point = sample_point(0);
            if level(start_point) != Some(false) {
                out.put(start_point, start_point + 1, "warnings", "Frame error")?;
                next_free = start_point + 1;
                continue;
            }
            out.put(frame_start, slot_start(1), "start", "Start bit")?;

            let mut value = 0u64;
            for bit in 0..self.data_bits {
                let high = level(sample_point(1 + bit)).unwrap_or(true);
                if self.msb_first {
                    value = (value << 1) | u64::from(high);
                } else {
                    value |= u64::from(high) << bit;
                }
            }
            pending = Some(PendingWord {
                start: frame_start,
                end: frame_start + (frame_bits * bit_width).ceil() as u64,
                text: self.format.format(value, self.data_bits),
                value,
            });

            if self.parity != Parity::None {
                let bitnum = 1 + self.data_bits;
                let bit = level(sample_point(bitnum)).unwrap_or(true);
                if !self.check_parity || self.parity.ok(bit, value) {
                    out.put(slot_start(bitnum), slot_start(bitnum + 1), "parity-ok", "Parity bit")?;
                } else {
                    out.put(slot_start(bitnum), slot_start(bitnum + 1), "parity-err", "Parity error")?;
                }
            }

            out.put(slot_start(stop_bitnum), stop_point + 1, "stop", "Stop bit")?;
            if level(stop_point) != Some(true) {
                out.put(stop_point, stop_point + 1, "warnings", "Frame error")?;
            }

            self.frames += 1;
            next_free = stop_point + 1;
        }

        if let Some(word) = pending.take() {
            word.emit(out, num_samples)?;
        }
        debug!("[uart] Decoded {} frames", self.frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{logic_window, run, uart_line};
    use crate::decode::{Annotation, DecoderInstance};

    fn data(annotations: &[Annotation]) -> Vec<(u64, u64, &str)> {
        annotations
            .iter()
            .filter(|a| a.class == "data")
            .map(|a| (a.start, a.end, a.text.as_str()))
            .collect()
    }

    fn uart() -> DecoderInstance {
        DecoderInstance::new("uart")
            .with_channel("rxtx", 0)
            .with_option("baudrate", 100_000i64)
    }

    #[test]
    fn test_decodes_bytes() {
        let window = logic_window(1, 1_000_000, &uart_line(b"Hi", 10, 5));
        let report = run(vec![uart()], &window);
        assert!(report.is_success());
        assert_eq!(data(&report.annotations), vec![(5, 105, "48"), (105, 205, "69")]);
        assert_eq!(report.annotations.iter().find(|a| a.class == "data").and_then(|a| a.value), Some(0x48));
        assert_eq!(report.annotations.iter().filter(|a| a.class == "stop").count(), 2);
        assert!(report.annotations.iter().all(|a| a.class != "warnings"));
    }

    #[test]
    fn test_line_is_bound_as_rxtx() {
        use crate::decode::{DecodeError, DecoderStack, decoder_definition};
        use crate::runtime::CancelToken;

        let definition = decoder_definition("uart").unwrap();
        assert!(definition.channel_role("rxtx").is_some());
        assert!(definition.channel_role("rx").is_none());

        let window = logic_window(1, 1_000_000, &uart_line(b"A", 10, 5));
        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("uart").with_channel("rx", 0));
        assert!(matches!(
            stack.run(&window, &CancelToken::new()),
            Err(DecodeError::MissingChannel { .. })
        ));
    }

    #[test]
    fn test_ascii_format_and_idle_gap() {
        let mut line = uart_line(b"A", 8, 3);
        line.extend(uart_line(b"\n", 8, 20));
        let window = logic_window(1, 800_000, &line);
        let report = run(vec![uart().with_option("format", "ascii")], &window);
        let texts: Vec<&str> = data(&report.annotations).into_iter().map(|(_, _, t)| t).collect();
        assert_eq!(texts, vec!["A", "[0A]"]);
    }

    #[test]
    fn test_inverted_line() {
        let line: Vec<u64> = uart_line(&[0x5A], 10, 5).into_iter().map(|v| v ^ 1).collect();
        let window = logic_window(1, 1_000_000, &line);
        let report = run(vec![uart().with_option("invert", "yes")], &window);
        assert_eq!(data(&report.annotations), vec![(5, 105, "5A")]);
    }

    #[test]
    fn test_parity_and_frame_errors() {
        // 0x01 with even parity bit set wrong (0), then a low stop bit
        let mut line = vec![1u64; 4];
        for bit in [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0] {
            line.extend(std::iter::repeat_n(bit, 10));
        }
        line.extend(std::iter::repeat_n(1, 30));
        let window = logic_window(1, 1_000_000, &line);
        let report = run(vec![uart().with_option("parity_type", "even")], &window);

        assert!(report.annotations.iter().any(|a| a.class == "parity-err"));
        let warnings: Vec<&Annotation> = report.annotations.iter().filter(|a| a.class == "warnings").collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].text, "Frame error");
        assert_eq!(data(&report.annotations), vec![(4, 114, "01")]);
    }

    #[test]
    fn test_msb_first_and_truncated_frame() {
        let mut line = uart_line(&[0x01], 10, 5);
        // start of a second frame cut off by the window end
        line.extend(std::iter::repeat_n(0, 30));
        let window = logic_window(1, 1_000_000, &line);
        let report = run(vec![uart().with_option("bit_order", "msb-first")], &window);
        assert_eq!(data(&report.annotations), vec![(5, 105, "80")]);
    }

    #[test]
    fn test_baud_above_samplerate_fails() {
        let window = logic_window(1, 1_000, &[1, 0, 1]);
        let report = run(vec![uart()], &window);
        assert!(report.failure(0).is_some());
    }
}
