//! Streaming capture, trigger and decode pipeline for DSLogic-style logic analyzers
//!
//! Samples flow one way: a [`SampleSource`] produces chunks on an acquisition
//! thread, the consumer path evaluates the trigger and fills a bounded
//! [`CaptureBuffer`], and the finished [`CaptureWindow`] is handed to a
//! [`DecoderStack`] on a worker thread.
//!
//! # Architecture
//!
//! - **source**: `SampleSource` trait, in-memory and `.dsl` file sources, acquisition thread
//! - **trigger**: simple, multi-stage and serial trigger matching
//! - **capture**: pre-trigger ring, post-trigger storage with optional RLE
//! - **decode**: decoder definitions, registry, built-in decoders and the stack
//! - **session**: the state machine tying it together, plus a status channel
//! - **export**: writing windows back to `.dsl` containers
//!
//! # Example
//!
//! ```no_run
//! use dslcap::{DecoderInstance, DslFileSource, Session, SessionConfig, TriggerConfig};
//!
//! let config = SessionConfig::new()
//!     .with_trigger(TriggerConfig::simple("X R".parse()?))
//!     .with_decoder(DecoderInstance::new("uart").with_channel("rxtx", 0));
//! let mut session = Session::new(Box::new(DslFileSource::new("capture.dsl")?), config)?;
//! let report = session.run()?;
//! for annotation in &report.annotations {
//!     println!("{}", annotation);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;
use thiserror::Error;

pub mod capture;
pub mod config;
pub mod decode;
pub mod export;
pub mod runtime;
pub mod session;
pub mod source;
pub mod trigger;

pub use capture::{BufferError, BufferOptions, CaptureBuffer, CaptureWindow, RleData, WindowSpec};
pub use config::{ConfigError, SessionConfig};
pub use decode::{
    Annotation, DecodeError, DecodeReport, DecoderDefinition, DecoderInstance, DecoderStack, OptionValue,
    decoder_definition, decoder_ids, register_decoder,
};
pub use export::{ExportError, ExportSummary, export_dsl};
pub use runtime::{CancelToken, SampleChunk, WorkError, WorkResult};
pub use session::{Session, SessionState, StatusEvent};
pub use source::{
    Calibration, Capabilities, Channel, ChannelKind, DeviceInfo, DeviceMode, DslFileSource, MemorySource,
    SampleSource, SourceConfig, SourceError,
};
pub use trigger::{MatchResult, SerialTrigger, TriggerConfig, TriggerError, TriggerMatcher, TriggerStage};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Work(#[from] WorkError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Session is {0}, operation not allowed")]
    Busy(SessionState),

    #[error("Source ended after {samples} samples without a trigger")]
    NoTrigger { samples: u64 },

    #[error("No capture window available")]
    NoWindow,

    /// A failure that moved a session to `Error`; the session keeps the same error
    #[error(transparent)]
    Session(Arc<CaptureError>),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Wrap with a description of what was being done
    pub fn context(self, context: impl Into<String>) -> Self {
        CaptureError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, past context and session wrappers
    pub fn root(&self) -> &CaptureError {
        match self {
            CaptureError::Context { source, .. } => source.root(),
            CaptureError::Session(inner) => inner.root(),
            other => other,
        }
    }
}

/// Attach context to any error convertible into [`CaptureError`]
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<CaptureError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Into::<CaptureError>::into(e).context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Into::<CaptureError>::into(e).context(f()))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_keeps_root() {
        let err = Err::<(), _>(BufferError::DataIntegrity { expected: 10, received: 8 }).context("capturing");
        let err = err.unwrap_err().context("session run");
        assert_eq!(
            err.to_string(),
            "session run: capturing: Data integrity error: expected 10 samples, received 8"
        );
        assert!(matches!(
            err.root(),
            CaptureError::Buffer(BufferError::DataIntegrity { expected: 10, .. })
        ));
    }

    #[test]
    fn test_shared_session_error() {
        let shared = Arc::new(CaptureError::from(TriggerError::NoStages));
        let err = CaptureError::Session(Arc::clone(&shared));
        assert_eq!(err.to_string(), shared.to_string());
        assert!(matches!(err.root(), CaptureError::Trigger(TriggerError::NoStages)));
    }
}
