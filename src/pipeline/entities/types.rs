use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::patterns::{PatternCache, PatternError};

/// Entity type codes. Ordering is the fixed order used in records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Citation,
    Date,
    Party,
    Section,
    Keyword,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        Self::Citation,
        Self::Date,
        Self::Party,
        Self::Section,
        Self::Keyword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Citation => "citation",
            Self::Date => "date",
            Self::Party => "party",
            Self::Section => "section",
            Self::Keyword => "keyword",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub raw_text: String,
    pub normalized_form: String,
    pub type_code: EntityType,
    /// Additive rubric score in [0, 1].
    pub confidence: f64,
    pub is_primary: bool,
    /// Byte offset of `raw_text` in the normalized document text.
    pub source_offset: usize,
    /// Parsed positional fields (volume, year, role, statute, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Entity {
    pub fn new(
        type_code: EntityType,
        raw_text: impl Into<String>,
        normalized_form: impl Into<String>,
        confidence: f64,
        source_offset: usize,
    ) -> Self {
        Self {
            raw_text: raw_text.into(),
            normalized_form: normalized_form.into(),
            type_code,
            confidence: clamp_confidence(confidence),
            is_primary: false,
            source_offset,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Byte range covered in the source text.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.source_offset..self.source_offset + self.raw_text.len()
    }
}

/// Cap to [0, 1] and round away float noise from the additive rubrics.
pub fn clamp_confidence(value: f64) -> f64 {
    let clamped = if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    };
    (clamped * 1000.0).round() / 1000.0
}

/// Order by confidence descending, then document position ascending, and
/// mark the first entity primary. Every other entity is marked non-primary.
pub fn rank_and_mark_primary(entities: &mut [Entity]) {
    entities.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then(a.source_offset.cmp(&b.source_offset))
    });
    for (i, entity) in entities.iter_mut().enumerate() {
        entity.is_primary = i == 0;
    }
}

/// Drop matches whose span overlaps an already-kept, higher-confidence match.
/// Input order decides ties, so rank first.
pub fn drop_overlapping(entities: Vec<Entity>) -> Vec<Entity> {
    let mut kept: Vec<Entity> = Vec::with_capacity(entities.len());
    for entity in entities {
        let span = entity.span();
        let overlaps = kept
            .iter()
            .any(|k| k.span().start < span.end && span.start < k.span().end);
        if !overlaps {
            kept.push(entity);
        }
    }
    kept
}

/// Common tail of every pass: rank, drop overlapping matches and repeated
/// normalized forms, then mark the primary entity.
pub fn finalize(mut entities: Vec<Entity>) -> Vec<Entity> {
    rank_and_mark_primary(&mut entities);
    let mut seen = std::collections::HashSet::new();
    let mut entities: Vec<Entity> = drop_overlapping(entities)
        .into_iter()
        .filter(|e| seen.insert(e.normalized_form.clone()))
        .collect();
    rank_and_mark_primary(&mut entities);
    entities
}

/// One independent entity-extraction pass over normalized text.
///
/// Passes load their rule sets through the shared pattern cache; a missing
/// or malformed rule set is the only way a pass can fail. No matches is an
/// empty result, not an error.
pub trait EntityPass: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn run(&self, text: &str, patterns: &PatternCache) -> Result<Vec<Entity>, PatternError>;
}
