//! Entity extraction
//!
//! Runs every rule of a [`PatternLibrary`] over flattened text. Results come
//! out in rule order, then match order within a rule; they are not sorted by
//! position and overlapping hits of different kinds are all kept.

use serde::{Deserialize, Serialize};

use crate::patterns::{EntityKind, PatternLibrary};

/// A classified substring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    pub value: String,
    /// Byte offset into the source text
    pub offset: usize,
}

/// Extract entities with the built-in pattern library
pub fn extract_entities(text: &str) -> Vec<ExtractedEntity> {
    EntityExtractor::default().extract(text)
}

#[derive(Debug, Clone, Default)]
pub struct EntityExtractor {
    library: PatternLibrary,
}

impl EntityExtractor {
    pub fn new(library: PatternLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &PatternLibrary {
        &self.library
    }

    /// Full scan, no truncation. Blank input yields nothing.
    pub fn extract(&self, text: &str) -> Vec<ExtractedEntity> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut entities = Vec::new();
        for rule in self.library.rules() {
            for (offset, value) in rule.find_iter(text) {
                entities.push(ExtractedEntity {
                    kind: rule.kind(),
                    value: value.to_string(),
                    offset,
                });
            }
        }
        entities
    }
}
