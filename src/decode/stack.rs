//! Ordered decoder chain and its execution

use super::DecodeError;
use super::decoder::{AnnotationSink, Decoder, DecoderInput};
use super::definition::{DecoderDefinition, InputKind, OptionValue};
use super::registry;
use super::types::Annotation;
use crate::capture::CaptureWindow;
use crate::runtime::CancelToken;
use crate::source::ChannelKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Configuration of one stack entry as stored in session files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderInstance {
    /// Registered definition id
    pub decoder: String,
    /// Channel role to device channel
    #[serde(default)]
    pub channels: BTreeMap<String, usize>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
}

impl DecoderInstance {
    pub fn new(decoder: impl Into<String>) -> Self {
        Self {
            decoder: decoder.into(),
            channels: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_channel(mut self, role: impl Into<String>, channel: usize) -> Self {
        self.channels.insert(role.into(), channel);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

struct StackEntry {
    config: DecoderInstance,
    definition: Option<&'static DecoderDefinition>,
    decoder: Result<Box<dyn Decoder>, String>,
}

/// Result of one stack run
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    /// Annotations of every successful instance, ordered by (instance, row, start)
    pub annotations: Vec<Annotation>,
    /// Per-instance failures that did not stop the rest of the stack
    pub failures: Vec<DecodeError>,
}

impl DecodeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(&self, instance: usize) -> Option<&DecodeError> {
        self.failures.iter().find(|e| e.instance() == Some(instance))
    }

    pub fn for_instance(&self, instance: usize) -> impl Iterator<Item = &Annotation> + '_ {
        self.annotations.iter().filter(move |a| a.instance == instance)
    }
}

/// Decoder instances in stack order. Entries are addressed by position;
/// an annotation consumer depends on the entry directly below it.
#[derive(Default)]
pub struct DecoderStack {
    entries: Vec<StackEntry>,
}

impl fmt::Debug for DecoderStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.config.decoder))
            .finish()
    }
}

impl DecoderStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the decoder and put it on top. Creation failures are kept and
    /// reported by [`DecoderStack::run`] for this position only.
    pub fn push(&mut self, config: DecoderInstance) -> usize {
        let position = self.entries.len();
        let (definition, decoder) = match registry::lookup(&config.decoder) {
            None => (None, Err(format!("unknown decoder '{}'", config.decoder))),
            Some(entry) => {
                let decoder = check_roles(entry.definition, &config)
                    .and_then(|_| {
                        if entry.definition.input == InputKind::Annotations && position == 0 {
                            Err("no decoder below to read annotations from".to_string())
                        } else {
                            Ok(())
                        }
                    })
                    .and_then(|_| entry.definition.resolve_options(&config.options))
                    .and_then(|options| (entry.factory)(&options));
                (Some(entry.definition), decoder)
            }
        };

        match &decoder {
            Ok(_) => debug!("[decode] Pushed {} at position {}", config.decoder, position),
            Err(reason) => warn!("[decode] {} at position {} unusable: {}", config.decoder, position, reason),
        }
        self.entries.push(StackEntry {
            config,
            definition,
            decoder,
        });
        position
    }

    /// Remove and destroy the top decoder
    pub fn pop(&mut self) -> Option<DecoderInstance> {
        self.entries.pop().map(|entry| entry.config)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = &DecoderInstance> + '_ {
        self.entries.iter().map(|e| &e.config)
    }

    /// Why the decoder at `position` could not be created
    pub fn creation_error(&self, position: usize) -> Option<&str> {
        self.entries
            .get(position)
            .and_then(|e| e.decoder.as_ref().err())
            .map(String::as_str)
    }

    /// Check every channel binding against the window
    pub fn validate(&self, window: &CaptureWindow) -> Result<(), DecodeError> {
        for (instance, entry) in self.entries.iter().enumerate() {
            let Some(definition) = entry.definition else {
                continue;
            };
            let missing = |role: &str, reason: String| DecodeError::MissingChannel {
                instance,
                decoder: definition.id.to_string(),
                role: role.to_string(),
                reason,
            };

            for spec in definition.channels {
                if !entry.config.channels.contains_key(spec.id) {
                    return Err(missing(spec.id, "is not bound".to_string()));
                }
            }
            for (role, &channel) in &entry.config.channels {
                match window.info.channel(channel) {
                    None => return Err(missing(role, format!("is bound to missing channel {}", channel))),
                    Some(ch) if !ch.enabled => {
                        return Err(missing(role, format!("is bound to disabled channel {}", channel)));
                    }
                    Some(ch) if ch.kind != ChannelKind::Digital => {
                        return Err(missing(role, format!("is bound to non-logic channel {}", channel)));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Decode `window` through the whole stack.
    ///
    /// Missing channels fail the run before any decoder is invoked.
    /// Cancellation aborts the run with [`DecodeError::Cancelled`]; every
    /// other failure is recorded in the report and only skips the
    /// decoders that consume the failed one's output.
    pub fn run(&mut self, window: &CaptureWindow, cancel: &CancelToken) -> Result<DecodeReport, DecodeError> {
        self.validate(window)?;
        info!(
            "[decode] Running {} decoders over {} samples",
            self.entries.len(),
            window.num_samples()
        );

        let mut report = DecodeReport::default();
        let mut outputs: Vec<Option<Vec<Annotation>>> = Vec::with_capacity(self.entries.len());

        for (instance, entry) in self.entries.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }

            let (definition, decoder) = match (entry.definition, entry.decoder.as_mut()) {
                (Some(definition), Ok(decoder)) => (definition, decoder),
                (_, Err(reason)) => {
                    report.failures.push(DecodeError::InstanceCreation {
                        instance,
                        decoder: entry.config.decoder.clone(),
                        reason: reason.clone(),
                    });
                    outputs.push(None);
                    continue;
                }
                (None, Ok(_)) => {
                    outputs.push(None);
                    continue;
                }
            };

            let upstream: &[Annotation] = match definition.input {
                InputKind::Logic => &[],
                InputKind::Annotations => match instance.checked_sub(1).and_then(|below| outputs[below].as_deref()) {
                    Some(annotations) => annotations,
                    None => {
                        debug!("[decode] Skipping {} at {}, upstream failed", definition.id, instance);
                        report.failures.push(DecodeError::Upstream {
                            instance,
                            decoder: definition.id.to_string(),
                            upstream: instance.saturating_sub(1),
                        });
                        outputs.push(None);
                        continue;
                    }
                },
            };

            let input = DecoderInput {
                instance,
                definition,
                window,
                channels: &entry.config.channels,
                upstream,
                cancel,
            };
            let mut sink = AnnotationSink::new(instance, definition, cancel);

            decoder.reset();
            let result = decoder.decode(&input, &mut sink);
            if cancel.is_cancelled() {
                info!("[decode] Cancelled in {} at position {}", definition.id, instance);
                return Err(DecodeError::Cancelled);
            }

            match result {
                Ok(()) => {
                    let mut annotations = sink.into_annotations();
                    annotations.sort_by_key(|a| (a.row, a.start));
                    debug!("[decode] {} produced {} annotations", definition.id, annotations.len());
                    outputs.push(Some(annotations));
                }
                Err(DecodeError::Cancelled) => return Err(DecodeError::Cancelled),
                Err(e) => {
                    warn!("[decode] {}", e);
                    report.failures.push(e);
                    outputs.push(None);
                }
            }
        }

        report.annotations = outputs.into_iter().flatten().flatten().collect();
        report
            .annotations
            .sort_by_key(|a| (a.instance, a.row, a.start));
        Ok(report)
    }
}

fn check_roles(definition: &DecoderDefinition, config: &DecoderInstance) -> Result<(), String> {
    match config.channels.keys().find(|role| definition.channel_role(role).is_none()) {
        Some(role) => Err(format!("'{}' has no channel role '{}'", definition.id, role)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::definition::{AnnotationClass, ChannelSpec, DecoderOptions};
    use crate::decode::register_decoder;
    use crate::source::{Calibration, Channel, DeviceInfo, DeviceMode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FAILING: DecoderDefinition = DecoderDefinition {
        id: "test-failing",
        name: "Failing",
        longname: "Always fails",
        desc: "",
        input: InputKind::Logic,
        channels: &[ChannelSpec { id: "d", name: "D", desc: "" }],
        optional_channels: &[],
        options: &[],
        annotations: &[AnnotationClass { id: "data", desc: "Data" }],
        rows: &[],
    };

    static COUNTING: DecoderDefinition = DecoderDefinition {
        id: "test-counting",
        name: "Counting",
        longname: "Counts invocations",
        desc: "",
        input: InputKind::Annotations,
        channels: &[],
        optional_channels: &[],
        options: &[],
        annotations: &[AnnotationClass { id: "count", desc: "Count" }],
        rows: &[],
    };

    static INVOKED: AtomicUsize = AtomicUsize::new(0);

    struct Failing;

    impl Decoder for Failing {
        fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
            out.put(0, 1, "data", "partial")?;
            Err(input.error(1, "broken"))
        }
    }

    struct Counting;

    impl Decoder for Counting {
        fn decode(&mut self, input: &DecoderInput<'_>, out: &mut AnnotationSink<'_>) -> Result<(), DecodeError> {
            INVOKED.fetch_add(1, Ordering::SeqCst);
            out.put(0, 1, "count", input.upstream().len().to_string())
        }
    }

    fn failing(_: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
        Ok(Box::new(Failing))
    }

    fn counting(_: &DecoderOptions) -> Result<Box<dyn Decoder>, String> {
        Ok(Box::new(Counting))
    }

    fn window(values: &[u8]) -> CaptureWindow {
        let info = DeviceInfo {
            mode: DeviceMode::Logic,
            samplerate_hz: 1_000_000,
            channels: vec![Channel::digital(0), Channel::digital(1), Channel::digital(2).disabled()],
        };
        CaptureWindow::from_raw(info, values.to_vec(), 0)
    }

    #[test]
    fn test_dependent_of_failed_decoder_is_not_invoked() {
        register_decoder(&FAILING, failing);
        register_decoder(&COUNTING, counting);

        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("test-failing").with_channel("d", 0));
        stack.push(DecoderInstance::new("test-counting"));
        let report = stack.run(&window(&[0, 1, 0]), &CancelToken::new()).unwrap();

        assert_eq!(INVOKED.load(Ordering::SeqCst), 0);
        assert!(matches!(report.failure(0), Some(DecodeError::Decoder { sample: 1, .. })));
        assert_eq!(
            report.failure(1),
            Some(&DecodeError::Upstream {
                instance: 1,
                decoder: "test-counting".into(),
                upstream: 0
            })
        );
        assert!(report.annotations.is_empty());
    }

    #[test]
    fn test_creation_failure_leaves_siblings_running() {
        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("no-such-decoder"));
        stack.push(DecoderInstance::new("words"));
        stack.push(
            DecoderInstance::new("uart")
                .with_channel("rxtx", 0)
                .with_option("baudrate", 100_000i64),
        );
        assert!(stack.creation_error(0).is_some());

        let report = stack.run(&window(&[1; 64]), &CancelToken::new()).unwrap();
        assert!(matches!(report.failure(0), Some(DecodeError::InstanceCreation { .. })));
        assert!(matches!(report.failure(1), Some(DecodeError::Upstream { upstream: 0, .. })));
        assert!(report.failure(2).is_none());
    }

    #[test]
    fn test_missing_channel_fails_fast() {
        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("uart"));
        assert!(matches!(
            stack.run(&window(&[0]), &CancelToken::new()),
            Err(DecodeError::MissingChannel { instance: 0, .. })
        ));

        stack.clear();
        stack.push(DecoderInstance::new("uart").with_channel("rxtx", 2));
        let err = stack.run(&window(&[0]), &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("disabled"));

        stack.clear();
        stack.push(DecoderInstance::new("uart").with_channel("rxtx", 9));
        assert!(stack.run(&window(&[0]), &CancelToken::new()).is_err());
    }

    #[test]
    fn test_analog_channel_is_not_decodable() {
        let info = DeviceInfo {
            mode: DeviceMode::Analog,
            samplerate_hz: 1_000,
            channels: vec![Channel::analog(0, Calibration { gain: 1.0, offset: 0.0 })],
        };
        let window = CaptureWindow::from_raw(info, vec![0, 1, 2], 0);
        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("uart").with_channel("rxtx", 0));
        assert!(matches!(
            stack.run(&window, &CancelToken::new()),
            Err(DecodeError::MissingChannel { .. })
        ));
    }

    #[test]
    fn test_invalid_options_and_roles() {
        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("uart").with_channel("rxtx", 0).with_option("parity_type", "weird"));
        stack.push(DecoderInstance::new("uart").with_channel("clk", 0));
        assert!(stack.creation_error(0).unwrap().contains("parity_type"));
        assert!(stack.creation_error(1).unwrap().contains("clk"));
        assert_eq!(stack.pop().map(|i| i.decoder), Some("uart".to_string()));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_cancelled_before_run() {
        let mut stack = DecoderStack::new();
        stack.push(DecoderInstance::new("uart").with_channel("rxtx", 0));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(stack.run(&window(&[1, 0, 1]), &cancel).unwrap_err(), DecodeError::Cancelled);
    }

    #[test]
    fn test_instance_json() {
        let instance: DecoderInstance =
            serde_json::from_str(r#"{"decoder": "spi", "channels": {"clk": 0, "mosi": 1}, "options": {"wordsize": 16}}"#)
                .unwrap();
        assert_eq!(
            instance,
            DecoderInstance::new("spi")
                .with_channel("clk", 0)
                .with_channel("mosi", 1)
                .with_option("wordsize", 16i64)
        );
    }
}
