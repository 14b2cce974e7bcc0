//! Protocol decoding over finished capture windows
//!
//! A [`DecoderStack`] is an ordered list of decoder instances. Position 0
//! decodes raw logic channels; a decoder whose definition consumes
//! annotations reads the output of the instance directly below it. Failures
//! stay local: a decoder that cannot be created or fails mid-window only
//! takes down the decoders stacked on top of it.

mod decoder;
mod decoders;
mod definition;
mod registry;
mod stack;
mod types;

pub use decoder::{AnnotationSink, Decoder, DecoderFactory, DecoderInput};
pub use definition::{
    AnnotationClass, AnnotationRow, ChannelSpec, DecoderDefinition, DecoderOptions, InputKind, OptionDefault,
    OptionSpec, OptionValue, OptionValues,
};
pub use registry::{decoder_definition, decoder_ids, register_decoder};
pub use stack::{DecodeReport, DecoderInstance, DecoderStack};
pub use types::{Annotation, CsPolarity, DataFormat, SpiMode, StrobeMode};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A channel role is unbound or bound to a missing, disabled or non-logic
    /// channel. Raised before any decoder runs.
    #[error("Decoder {instance} ({decoder}): channel '{role}' {reason}")]
    MissingChannel {
        instance: usize,
        decoder: String,
        role: String,
        reason: String,
    },

    #[error("Decoder {instance}: cannot create '{decoder}': {reason}")]
    InstanceCreation {
        instance: usize,
        decoder: String,
        reason: String,
    },

    #[error("Decoder {instance} ({decoder}) not run, decoder {upstream} below it failed")]
    Upstream {
        instance: usize,
        decoder: String,
        upstream: usize,
    },

    #[error("Decoder {instance} ({decoder}) failed at sample {sample}: {reason}")]
    Decoder {
        instance: usize,
        decoder: String,
        sample: u64,
        reason: String,
    },

    #[error("Decoder {instance}: annotation at {start} overlaps row {row} ending at {previous_end}")]
    Overlap {
        instance: usize,
        row: usize,
        start: u64,
        previous_end: u64,
    },

    #[error("Decode cancelled")]
    Cancelled,
}

impl DecodeError {
    /// Stack position the error belongs to
    pub fn instance(&self) -> Option<usize> {
        match self {
            DecodeError::MissingChannel { instance, .. }
            | DecodeError::InstanceCreation { instance, .. }
            | DecodeError::Upstream { instance, .. }
            | DecodeError::Decoder { instance, .. }
            | DecodeError::Overlap { instance, .. } => Some(*instance),
            DecodeError::Cancelled => None,
        }
    }
}
