//! Global registry of decoder definitions
//!
//! Built-in decoders are registered on first use; applications add their
//! own with [`register_decoder`].

use super::decoder::DecoderFactory;
use super::decoders;
use super::definition::DecoderDefinition;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone, Copy)]
pub(crate) struct RegistryEntry {
    pub definition: &'static DecoderDefinition,
    pub factory: DecoderFactory,
}

pub(crate) struct DecoderRegistry {
    entries: BTreeMap<&'static str, RegistryEntry>,
}

impl DecoderRegistry {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn register(&mut self, definition: &'static DecoderDefinition, factory: DecoderFactory) {
        if self
            .entries
            .insert(definition.id, RegistryEntry { definition, factory })
            .is_some()
        {
            debug!("[registry] Replaced decoder '{}'", definition.id);
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<RegistryEntry> {
        self.entries.get(id).copied()
    }
}

// Global decoder registry
lazy_static::lazy_static! {
    pub(crate) static ref DECODER_REGISTRY: Arc<Mutex<DecoderRegistry>> = {
        let mut registry = DecoderRegistry::new();
        for (definition, factory) in decoders::builtins() {
            registry.register(definition, factory);
        }
        Arc::new(Mutex::new(registry))
    };
}

/// Register a decoder under its definition id, replacing any previous one
pub fn register_decoder(definition: &'static DecoderDefinition, factory: DecoderFactory) {
    if let Ok(mut registry) = DECODER_REGISTRY.lock() {
        registry.register(definition, factory);
    }
}

pub(crate) fn lookup(id: &str) -> Option<RegistryEntry> {
    DECODER_REGISTRY.lock().ok().and_then(|registry| registry.get(id))
}

/// Definition registered under `id`
pub fn decoder_definition(id: &str) -> Option<&'static DecoderDefinition> {
    lookup(id).map(|entry| entry.definition)
}

/// Ids of all registered decoders, sorted
pub fn decoder_ids() -> Vec<&'static str> {
    DECODER_REGISTRY
        .lock()
        .map(|registry| registry.entries.keys().copied().collect())
        .unwrap_or_default()
}
