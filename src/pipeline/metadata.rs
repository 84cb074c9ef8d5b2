//! Structured document metadata assembled from normalized text and entities.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::entities::{Entity, EntityType};

pub mod thresholds {
    /// A title line needs at least this many letters.
    pub const TITLE_MIN_LETTERS: usize = 3;
    pub const TITLE_MAX_CHARS: usize = 200;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub primary_date: Option<NaiveDate>,
    /// Party names in caption order.
    pub parties: Vec<String>,
    /// Citation key of the primary citation.
    pub primary_citation: Option<String>,
    pub total_citations: usize,
    pub total_dates: usize,
    pub total_sections: usize,
    /// Keyword codes, strongest first.
    pub keywords: Vec<String>,
    pub page_count: usize,
    pub word_count: usize,
}

fn letters(s: &str) -> usize {
    s.chars().filter(|c| c.is_alphabetic()).count()
}

/// First line with enough letters and a sane length that is not just a
/// citation.
pub fn detect_title(text: &str, citations: &[Entity]) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.chars().count() <= thresholds::TITLE_MAX_CHARS)
        .find(|line| {
            let remainder = citations
                .iter()
                .fold(line.to_string(), |acc, c| acc.replace(&c.raw_text, ""));
            letters(&remainder) >= thresholds::TITLE_MIN_LETTERS
        })
        .map(str::to_string)
}

fn primary(entities: &BTreeMap<EntityType, Vec<Entity>>, kind: EntityType) -> Option<&Entity> {
    entities.get(&kind)?.iter().find(|e| e.is_primary)
}

fn of_type(entities: &BTreeMap<EntityType, Vec<Entity>>, kind: EntityType) -> &[Entity] {
    entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
}

/// Build metadata from the normalized text and the merged entity passes.
pub fn assemble_metadata(
    text: &str,
    page_count: usize,
    entities: &BTreeMap<EntityType, Vec<Entity>>,
) -> DocumentMetadata {
    let citations = of_type(entities, EntityType::Citation);

    let mut parties: Vec<&Entity> = of_type(entities, EntityType::Party).iter().collect();
    parties.sort_by_key(|p| p.source_offset);

    DocumentMetadata {
        title: detect_title(text, citations),
        primary_date: primary(entities, EntityType::Date)
            .and_then(|d| NaiveDate::parse_from_str(&d.normalized_form, "%Y-%m-%d").ok()),
        parties: parties.iter().map(|p| p.normalized_form.clone()).collect(),
        primary_citation: primary(entities, EntityType::Citation).map(|c| c.normalized_form.clone()),
        total_citations: citations.len(),
        total_dates: of_type(entities, EntityType::Date).len(),
        total_sections: of_type(entities, EntityType::Section).len(),
        keywords: of_type(entities, EntityType::Keyword)
            .iter()
            .map(|k| k.normalized_form.clone())
            .collect(),
        page_count,
        word_count: text.split_whitespace().count(),
    }
}
