//! Per-dimension scoring. Each function returns a score in [0, 1].

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use super::types::AssembledRecord;
use crate::pipeline::entities::{Entity, EntityType};
use crate::pipeline::extraction::QualityTier;

pub mod thresholds {
    // Completeness field weights (sum to 1.0)
    pub const TEXT_WEIGHT: f64 = 0.15;
    pub const TITLE_WEIGHT: f64 = 0.20;
    pub const PRIMARY_DATE_WEIGHT: f64 = 0.20;
    pub const CITATION_WEIGHT: f64 = 0.30;
    pub const PARTIES_WEIGHT: f64 = 0.15;

    pub const CITATION_CONFIDENCE_SHARE: f64 = 0.70;
    pub const CITATION_STRUCTURE_SHARE: f64 = 0.30;

    pub const TIER_HIGH: f64 = 1.0;
    pub const TIER_MEDIUM: f64 = 0.7;
    pub const TIER_LOW: f64 = 0.4;
    /// Texts shorter than this (in characters) have their text score halved.
    pub const SHORT_TEXT_CHARS: usize = 200;
    pub const SHORT_TEXT_FACTOR: f64 = 0.5;

    /// Metadata validity when no date, party or section was extracted.
    pub const NO_METADATA_SCORE: f64 = 0.5;
}

static TITLE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").expect("valid regex"));

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn citation_year(citation: &Entity) -> Option<i32> {
    citation.field("year")?.parse().ok()
}

/// Completeness score and the phrases naming what is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Completeness {
    pub score: f64,
    pub missing: Vec<&'static str>,
}

pub fn completeness(record: &AssembledRecord<'_>) -> Completeness {
    let meta = record.metadata;
    let checks = [
        (!record.text.trim().is_empty(), thresholds::TEXT_WEIGHT, "no text was extracted"),
        (meta.title.is_some(), thresholds::TITLE_WEIGHT, "no title was found"),
        (
            meta.primary_date.is_some(),
            thresholds::PRIMARY_DATE_WEIGHT,
            "no primary date was found",
        ),
        (
            meta.total_citations > 0,
            thresholds::CITATION_WEIGHT,
            "no citations were extracted",
        ),
        (
            !meta.parties.is_empty(),
            thresholds::PARTIES_WEIGHT,
            "no parties were identified",
        ),
    ];

    let mut score = 0.0;
    let mut missing = Vec::new();
    for (present, weight, phrase) in checks {
        if present {
            score += weight;
        } else {
            missing.push(phrase);
        }
    }
    Completeness { score, missing }
}

/// Mean citation confidence blended with the share of structurally complete
/// citations (year, reporter and page present). Zero without citations.
pub fn citation_quality(record: &AssembledRecord<'_>) -> f64 {
    let citations = record.entities_of(EntityType::Citation);
    let Some(confidence) = mean(citations.iter().map(|c| c.confidence)) else {
        return 0.0;
    };
    let structured = citations
        .iter()
        .filter(|c| ["year", "reporter", "page"].iter().all(|f| c.field(f).is_some()))
        .count();
    let structure = structured as f64 / citations.len() as f64;

    thresholds::CITATION_CONFIDENCE_SHARE * confidence
        + thresholds::CITATION_STRUCTURE_SHARE * structure
}

/// Tier score, blended with OCR confidence for scanned documents and
/// penalized for very short text.
pub fn text_quality(record: &AssembledRecord<'_>) -> f64 {
    let Some(extraction) = record.extraction else {
        return 0.0;
    };
    let tier = match extraction.quality_tier {
        QualityTier::High => thresholds::TIER_HIGH,
        QualityTier::Medium => thresholds::TIER_MEDIUM,
        QualityTier::Low => thresholds::TIER_LOW,
    };
    let mut score = match extraction.ocr_confidence {
        Some(ocr) => 0.5 * tier + 0.5 * ocr.clamp(0.0, 1.0),
        None => tier,
    };
    if record.text.chars().count() < thresholds::SHORT_TEXT_CHARS {
        score *= thresholds::SHORT_TEXT_FACTOR;
    }
    score
}

/// Mean confidence of date, party and section entities.
pub fn metadata_validity(record: &AssembledRecord<'_>) -> f64 {
    let structured = [EntityType::Date, EntityType::Party, EntityType::Section]
        .into_iter()
        .flat_map(|kind| record.entities_of(kind))
        .map(|e| e.confidence);
    mean(structured).unwrap_or(thresholds::NO_METADATA_SCORE)
}

/// Consistency score and descriptions of the checks that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Consistency {
    pub score: f64,
    pub failures: Vec<String>,
}

/// Fraction of applicable cross-field checks that pass. With nothing to
/// check the record is consistent.
pub fn consistency(record: &AssembledRecord<'_>, today: NaiveDate) -> Consistency {
    let meta = record.metadata;
    let citation_years: Vec<i32> = record
        .entities_of(EntityType::Citation)
        .iter()
        .filter_map(citation_year)
        .collect();

    let mut checks: Vec<(bool, String)> = Vec::new();

    if let Some(date) = meta.primary_date {
        checks.push((date <= today, format!("primary date {date} is in the future")));

        if !citation_years.is_empty() {
            let latest = citation_years.iter().copied().max().unwrap_or(date.year());
            checks.push((
                latest <= date.year(),
                format!("citation year {latest} is after the primary date year {}", date.year()),
            ));
        }

        let title_year = meta
            .title
            .as_deref()
            .and_then(|t| TITLE_YEAR.find(t))
            .and_then(|m| m.as_str().parse::<i32>().ok());
        if let Some(year) = title_year {
            checks.push((
                year == date.year(),
                format!("title year {year} does not match primary date year {}", date.year()),
            ));
        }
    }

    if let Some(latest) = citation_years.iter().copied().max() {
        checks.push((
            latest <= today.year(),
            format!("citation year {latest} is in the future"),
        ));
    }

    if checks.is_empty() {
        return Consistency {
            score: 1.0,
            failures: Vec::new(),
        };
    }

    let passed = checks.iter().filter(|(ok, _)| *ok).count();
    Consistency {
        score: passed as f64 / checks.len() as f64,
        failures: checks
            .into_iter()
            .filter(|(ok, _)| !ok)
            .map(|(_, why)| why)
            .collect(),
    }
}
