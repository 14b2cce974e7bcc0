//! Built-in decoders

mod i2c;
mod parallel;
mod spi;
mod text;
mod uart;
mod words;

use super::decoder::DecoderFactory;
use super::definition::DecoderDefinition;

pub(crate) fn builtins() -> Vec<(&'static DecoderDefinition, DecoderFactory)> {
    vec![
        (&uart::DEFINITION, uart::create),
        (&spi::DEFINITION, spi::create),
        (&i2c::DEFINITION, i2c::create),
        (&parallel::DEFINITION, parallel::create),
        (&text::DEFINITION, text::create),
        (&words::DEFINITION, words::create),
    ]
}

/// Option choices shared by several decoders
pub(crate) const FORMATS: &[&str] = &["ascii", "dec", "hex", "oct", "bin"];
pub(crate) const YES_NO: &[&str] = &["yes", "no"];
