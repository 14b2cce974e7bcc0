//! Stacked decoder assembling byte annotations into text lines

use crate::decode::definition::{
    AnnotationClass, AnnotationRow, DecoderDefinition, DecoderOptions, InputKind, OptionDefault, OptionSpec,
    OptionValues,
};
use crate::decode::{AnnotationSink, DecodeError, Decoder, DecoderInput};

pub(crate) static DEFINITION: DecoderDefinition = DecoderDefinition {
    id: "text",
    name: "Text",
    longname: "Text lines",
    desc: "Joins decoded bytes into lines of text.",
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
            id: "gap",
            desc: "Idle samples that end a line (0 = newline only)",
            default: OptionDefault::Int(0),
            values: OptionValues::Range(0, i64::MAX),
        },
    ],
    annotations: &[AnnotationClass { id: "line", desc: "Text line" }],
    rows: &[AnnotationRow { id: "lines", desc: "Lines", classes: &[0] }],
};

pub(crate) struct Text {
    class: String,
    gap: u64,
}

pub(crate) fn create(options: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
    Ok(Box::new(Text {
        class: options.str("class").to_string(),
        gap: options.int("gap").max(0) as u64,
    }))
}

struct Line {
    start: u64,
    end: u64,
    text: String,
}

impl Line {
    fn flush(line: &mut Option<Line>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        match line.take() {
            Some(line) => out.put(line.start, line.end, "line", line.text),
            None => Ok(()),
        }
    }
}

fn push_char(text: &mut String, byte: u8) {
    match byte {
        b'\r' => {}
        b'\t' => text.push('\t'),
        0x20..=0x7E => text.push(char::from(byte)),
        _ => text.push_str(&format!("\\x{:02X}", byte)),
    }
}

impl Decoder for Text {
    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
        let mut line: Option<Line> = None;

        for item in input.upstream().iter().filter(|a| a.class == self.class) {
            let Some(value) = item.value else {
                continue;
            };
            if self.gap > 0
                && let Some(current) = &line
                && item.start.saturating_sub(current.end) > self.gap
            {
                Line::flush(&mut line, out)?;
            }

            if value == u64::from(b'\n') {
                if let Some(current) = &mut line {
                    current.end = item.end;
                }
                Line::flush(&mut line, out)?;
                continue;
            }

            let current = line.get_or_insert_with(|| Line {
                start: item.start,
                end: item.end,
                text: String::new(),
            });
            current.end = item.end;
            push_char(&mut current.text, (value & 0xFF) as u8);
        }
        Line::flush(&mut line, out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{logic_window, run, uart_line};
    use crate::decode::DecoderInstance;

    fn uart() -> DecoderInstance {
        DecoderInstance::new("uart")
            .with_channel("rxtx", 0)
            .with_option("baudrate", 100_000i64)
    }

    fn lines(report: &crate::decode::DecodeReport) -> Vec<String> {
        report.for_instance(1).map(|a| a.text.clone()).collect()
    }

    #[test]
    fn test_lines_from_uart() {
        let window = logic_window(1, 1_000_000, &uart_line(b"ok\r\nhi\x01", 10, 5));
        let report = run(vec![uart(), DecoderInstance::new("text")], &window);
        assert!(report.is_success());
        assert_eq!(lines(&report), vec!["ok".to_string(), "hi\\x01".to_string()]);

        let first = report.for_instance(1).next().unwrap();
        assert_eq!(first.start, 5);
        assert_eq!(first.end, 405);
    }

    #[test]
    fn test_gap_splits_lines() {
        let mut line = uart_line(b"ab", 10, 5);
        line.extend(uart_line(b"c", 10, 200));
        let window = logic_window(1, 1_000_000, &line);
        let report = run(
            vec![uart(), DecoderInstance::new("text").with_option("gap", 50i64)],
            &window,
        );
        assert_eq!(lines(&report), vec!["ab".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_other_class_is_ignored() {
        let window = logic_window(1, 1_000_000, &uart_line(b"x", 10, 5));
        let report = run(
            vec![uart(), DecoderInstance::new("text").with_option("class", "stop")],
            &window,
        );
        assert!(report.is_success());
        assert_eq!(report.for_instance(1).count(), 0);
    }
}
