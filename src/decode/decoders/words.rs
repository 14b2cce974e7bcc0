//! Stacked decoder combining consecutive values into wider words

use super::FORMATS;
use crate::decode::definition::{
    AnnotationClass, AnnotationRow, DecoderDefinition, DecoderOptions, InputKind, OptionDefault, OptionSpec,
    OptionValues,
};
use crate::decode::{AnnotationSink, DataFormat, DecodeError, Decoder, DecoderInput};

pub(crate) static DEFINITION: DecoderDefinition = DecoderDefinition {
    id: "words",
    name: "Words",
    longname: "Word assembler",
    desc: "Groups decoded values into multi-byte words.",
    input: InputKind::Annotations,
    channels: &[],
    optional_channels: &[],
    options: &[
        OptionSpec {
            id: "class",
            desc: "Upstream annotation class to read",
            default: OptionDefault::Str("data"),
            values: OptionValues::Any,
        },
        OptionSpec {
            id: "count",
            desc: "Values per word",
            default: OptionDefault::Int(2),
            values: OptionValues::Range(1, 8),
        },
        OptionSpec {
            id: "bits",
            desc: "Bits per value",
            default: OptionDefault::Int(8),
            values: OptionValues::Range(1, 32),
        },
        OptionSpec {
            id: "endianness",
            desc: "Order of values in a word",
            default: OptionDefault::Str("big"),
            values: OptionValues::Choices(&["big", "little"]),
        },
        OptionSpec {
            id: "gap",
            desc: "Idle samples that drop a partial word (0 = never)",
            default: OptionDefault::Int(0),
            values: OptionValues::Range(0, i64::MAX),
        },
        OptionSpec {
            id: "format",
            desc: "Data format",
            default: OptionDefault::Str("hex"),
            values: OptionValues::Choices(FORMATS),
        },
    ],
    annotations: &[
        AnnotationClass { id: "word", desc: "Word" },
        AnnotationClass { id: "warnings", desc: "Warnings" },
    ],
    rows: &[
        AnnotationRow { id: "words", desc: "Words", classes: &[0] },
        AnnotationRow { id: "warnings", desc: "Warnings", classes: &[1] },
    ],
};

pub(crate) struct Words {
    class: String,
    count: usize,
    bits: usize,
    little_endian: bool,
    gap: u64,
    format: DataFormat,
}

pub(crate) fn create(options: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
    let count = options.int("count") as usize;
    let bits = options.int("bits") as usize;
    if count * bits > 64 {
        return Err(format!("{} values of {} bits do not fit in 64 bits", count, bits));
    }
    let format =
        DataFormat::parse(options.str("format")).ok_or_else(|| format!("invalid format '{}'", options.str("format")))?;
    Ok(Box::new(Words {
        class: options.str("class").to_string(),
        count,
        bits,
        little_endian: options.str("endianness") == "little",
        gap: options.int("gap").max(0) as u64,
        format,
    }))
}

impl Words {
    fn assemble(&self, values: &[u64]) -> u64 {
        let mask = if self.bits == 64 { u64::MAX } else { (1u64 << self.bits) - 1 };
        let ordered: Box<dyn Iterator<Item = &u64>> = if self.little_endian {
            Box::new(values.iter().rev())
        } else {
            Box::new(values.iter())
        };
        ordered.fold(0u64, |word, v| (word << self.bits) | (v & mask))
    }

    fn drop_partial(&self, part: &mut Vec<(u64, u64, u64)>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        if let (Some(first), Some(last)) = (part.first(), part.last()) {
            out.put(
                first.0,
                last.1,
                "warnings",
                format!("Incomplete word: {}/{} values", part.len(), self.count),
            )?;
        }
        part.clear();
        Ok(())
    }
}

impl Decoder for Words {
    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        // (start, end, value) of the values collected so far
        let mut part: Vec<(u64, u64, u64)> = Vec::with_capacity(self.count);

        for item in input.upstream().iter().filter(|a| a.class == self.class) {
            let Some(value) = item.value else {
                continue;
            };
            if self.gap > 0
                && let Some(last) = part.last()
                && item.start.saturating_sub(last.1) > self.gap
            {
                self.drop_partial(&mut part, out)?;
            }

            part.push((item.start, item.end, value));
            if part.len() < self.count {
                continue;
            }

            let values: Vec<u64> = part.iter().map(|p| p.2).collect();
            let word = self.assemble(&values);
            let (start, end) = (part[0].0, part[part.len() - 1].1);
            out.put_value(start, end, "word", self.format.format(word, self.count * self.bits), word)?;
            part.clear();
        }

        self.drop_partial(&mut part, out)
    }
}
