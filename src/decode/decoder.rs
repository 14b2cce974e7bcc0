//! Decoder entry point and the views it gets of a capture window

use super::DecodeError;
use super::definition::{DecoderDefinition, DecoderOptions};
use super::types::Annotation;
use crate::capture::CaptureWindow;
use crate::runtime::{CancelToken, Edge};
use std::collections::BTreeMap;
use tracing::trace;

/// Builds a decoder from its resolved options
pub type DecoderFactory = fn(&DecoderOptions) -> Result<Box<dyn Decoder>, String>;

/// A protocol decoder
///
/// One instance lives from push to pop. `decode` sees the whole window at
/// once and may keep state across it; `reset` runs before every window.
pub trait Decoder: Send {
    fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError>;

    fn reset(&mut self) {}
}

/// What a decoder sees: the window, its channel bindings and the annotations
/// of the decoder below it
pub struct DecoderInput<'a> {
    pub(crate) instance: usize,
    pub(crate) definition: &'static DecoderDefinition,
    pub(crate) window: &'a CaptureWindow,
    pub(crate) channels: &'a BTreeMap<String, usize>,
    pub(crate) upstream: &'a [Annotation],
    pub(crate) cancel: &'a CancelToken,
}

impl<'a> DecoderInput<'a> {
    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn window(&self) -> &'a CaptureWindow {
        self.window
    }

    pub fn samplerate_hz(&self) -> u64 {
        self.window.samplerate_hz()
    }

    pub fn num_samples(&self) -> u64 {
        self.window.num_samples()
    }

    /// Device channel bound to `role`
    pub fn channel(&self, role: &str) -> Option<usize> {
        self.channels.get(role).copied()
    }

    pub fn has_channel(&self, role: &str) -> bool {
        self.channels.contains_key(role)
    }

    /// Level changes of the channel bound to `role`; empty when unbound
    pub fn edges(&self, role: &str) -> Vec<Edge> {
        self.channel(role).map(|ch| self.window.edges(ch)).unwrap_or_default()
    }

    pub fn level_at(&self, role: &str, index: u64) -> Option<bool> {
        self.channel(role).and_then(|ch| self.window.bit(index, ch))
    }

    /// Annotations of the decoder below, ordered by row then start
    pub fn upstream(&self) -> &'a [Annotation] {
        self.upstream
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), DecodeError> {
        if self.cancel.is_cancelled() {
            Err(DecodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Decoder failure at `sample`, tagged with this instance
    pub fn error(&self, sample: u64, reason: impl Into<String>) -> DecodeError {
        DecodeError::Decoder {
            instance: self.instance,
            decoder: self.definition.id.to_string(),
            sample,
            reason: reason.into(),
        }
    }
}

/// Collects the annotations of one decoder run
///
/// Rejects annotations that overlap or go backwards within a row and stops
/// accepting anything once the run is cancelled.
pub struct AnnotationSink<'a> {
    instance: usize,
    definition: &'static DecoderDefinition,
    cancel: &'a CancelToken,
    annotations: Vec<Annotation>,
    row_ends: BTreeMap<usize, u64>,
}

impl<'a> AnnotationSink<'a> {
    pub(crate) fn new(instance: usize, definition: &'static DecoderDefinition, cancel: &'a CancelToken) -> Self {
        Self {
            instance,
            definition,
            cancel,
            annotations: Vec::new(),
            row_ends: BTreeMap::new(),
        }
    }

    pub fn put(&mut self, start: u64, end: u64, class: &'static str, text: impl Into<String>) -> Result<(), DecodeError> {
        self.push(start, end, class, text.into(), None)
    }

    /// Annotation carrying the decoded value for stacked decoders
    pub fn put_value(
        &mut self,
        start: u64,
        end: u64,
        class: &'static str,
        text: impl Into<String>,
        value: u64,
    ) -> Result<(), DecodeError> {
        self.push(start, end, class, text.into(), Some(value))
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub(crate) fn into_annotations(self) -> Vec<Annotation> {
        self.annotations
    }

    fn push(
        &mut self,
        start: u64,
        end: u64,
        class: &'static str,
        text: String,
        value: Option<u64>,
    ) -> Result<(), DecodeError> {
        if self.cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        let class_index = self.definition.class_index(class).ok_or_else(|| DecodeError::Decoder {
            instance: self.instance,
            decoder: self.definition.id.to_string(),
            sample: start,
            reason: format!("unknown annotation class '{}'", class),
        })?;
        if end < start {
            return Err(DecodeError::Decoder {
                instance: self.instance,
                decoder: self.definition.id.to_string(),
                sample: start,
                reason: format!("annotation ends at {} before it starts", end),
            });
        }

        let row = self.definition.row_of(class_index);
        if let Some(&previous_end) = self.row_ends.get(&row)
            && start < previous_end
        {
            return Err(DecodeError::Overlap {
                instance: self.instance,
                row,
                start,
                previous_end,
            });
        }
        self.row_ends.insert(row, end);

        trace!("[decode] #{} {}..{} {}: {}", self.instance, start, end, class, text);
        self.annotations.push(Annotation {
            instance: self.instance,
            row,
            class,
            start,
            end,
            text,
            value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::definition::{AnnotationClass, AnnotationRow, InputKind};

    static DEF: DecoderDefinition = DecoderDefinition {
        id: "rows",
        name: "Rows",
        longname: "Row test",
        desc: "",
        input: InputKind::Logic,
        channels: &[],
        optional_channels: &[],
        options: &[],
        annotations: &[
            AnnotationClass { id: "a", desc: "A" },
            AnnotationClass { id: "b", desc: "B" },
        ],
        rows: &[
            AnnotationRow { id: "a", desc: "A", classes: &[0] },
            AnnotationRow { id: "b", desc: "B", classes: &[1] },
        ],
    };

    #[test]
    fn test_rows_are_checked_independently() {
        let cancel = CancelToken::new();
        let mut sink = AnnotationSink::new(0, &DEF, &cancel);
        sink.put(0, 10, "a", "x").unwrap();
        sink.put(5, 8, "b", "y").unwrap();
        sink.put(10, 12, "a", "z").unwrap();
        assert!(matches!(
            sink.put(11, 13, "a", "overlap"),
            Err(DecodeError::Overlap { row: 0, start: 11, previous_end: 12, .. })
        ));
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_unknown_class_and_reversed_interval() {
        let cancel = CancelToken::new();
        let mut sink = AnnotationSink::new(2, &DEF, &cancel);
        assert!(matches!(sink.put(0, 1, "c", ""), Err(DecodeError::Decoder { instance: 2, .. })));
        assert!(matches!(sink.put(5, 1, "a", ""), Err(DecodeError::Decoder { .. })));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_cancel_stops_emission() {
        let cancel = CancelToken::new();
        let mut sink = AnnotationSink::new(0, &DEF, &cancel);
        sink.put_value(0, 1, "a", "1", 1).unwrap();
        cancel.cancel();
        assert_eq!(sink.put(1, 2, "a", "2"), Err(DecodeError::Cancelled));
        assert_eq!(sink.into_annotations().len(), 1);
    }
}
