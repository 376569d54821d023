//! Writing-system encoding converters.
//!
//! Legacy Shoebox data can embed spans typed in single-byte fonts; a
//! character mapping with an old-writing-system effect routes those spans
//! through the converter registered for that writing system. Text with no
//! registered converter is assumed to already be valid UTF-8 and passes
//! through unchanged, never an error.

use std::collections::HashMap;

use crate::error::Result;

/// One legacy-encoding converter.
pub trait EncodingConverter {
    fn convert(&self, input: &str) -> Result<String>;
}

/// Registry of converters keyed by writing-system tag.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: HashMap<String, Box<dyn EncodingConverter>>,
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("writing_systems", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConverterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        writing_system: impl Into<String>,
        converter: Box<dyn EncodingConverter>,
    ) {
        self.converters.insert(writing_system.into(), converter);
    }

    #[must_use]
    pub fn has(&self, writing_system: &str) -> bool {
        self.converters.contains_key(writing_system)
    }

    /// Convert `text` for `writing_system`; passthrough when no converter
    /// is registered.
    pub fn convert(&self, writing_system: &str, text: &str) -> Result<String> {
        match self.converters.get(writing_system) {
            Some(converter) => converter.convert(text),
            None => Ok(text.to_string()),
        }
    }
}

/// Character remapping for legacy single-byte fonts whose glyphs were
/// typed as ordinary ASCII/Latin-1 codepoints.
#[derive(Debug, Default, Clone)]
pub struct CharRemapConverter {
    map: HashMap<char, char>,
}

impl CharRemapConverter {
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (char, char)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
        }
    }
}

impl EncodingConverter for CharRemapConverter {
    fn convert(&self, input: &str) -> Result<String> {
        Ok(input
            .chars()
            .map(|c| self.map.get(&c).copied().unwrap_or(c))
            .collect())
    }
}
