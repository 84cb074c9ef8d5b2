//! Law-report citation extraction with an additive confidence rubric.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Datelike;
use regex::Captures;

use super::patterns::{PatternCache, PatternError, PatternRule, PatternSet, CITATIONS, COURTS};
use super::types::{finalize, Entity, EntityPass, EntityType};

/// Rubric weights and plausibility ranges.
pub mod thresholds {
    pub const YEAR_POINTS: f64 = 0.30;
    pub const PAGE_POINTS: f64 = 0.20;
    pub const VOLUME_POINTS: f64 = 0.20;
    pub const COURT_KNOWN_POINTS: f64 = 0.20;
    pub const COURT_PARTIAL_POINTS: f64 = 0.10;
    pub const REPORTER_POINTS: f64 = 0.10;

    pub const EARLIEST_YEAR: i32 = 1800;
    pub const MAX_PAGE: u32 = 9999;
    pub const MAX_VOLUME: u32 = 200;
}

/// Deterministic citation key: `REPORTER:YEAR:VOLUME:COURT:PAGE`, with `_`
/// for absent parts. The same components give the same key whichever
/// format the citation was written in.
pub fn citation_key(
    reporter: &str,
    year: Option<i32>,
    volume: Option<u32>,
    court: Option<&str>,
    page: Option<u32>,
) -> String {
    fn part<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "_".to_string(), |v| v.to_string())
    }
    format!(
        "{}:{}:{}:{}:{}",
        reporter.trim().to_uppercase(),
        part(year),
        part(volume),
        part(court.map(|c| c.trim().to_uppercase())),
        part(page),
    )
}

/// Citation extractor over a compiled citation rule set and court registry.
/// `extract_all` never fails; no match yields an empty list.
pub struct CitationExtractor {
    citations: Arc<PatternSet>,
    courts: Arc<PatternSet>,
    years: RangeInclusive<i32>,
}

impl CitationExtractor {
    pub fn new(citations: Arc<PatternSet>, courts: Arc<PatternSet>) -> Self {
        Self {
            citations,
            courts,
            years: thresholds::EARLIEST_YEAR..=chrono::Utc::now().year(),
        }
    }

    pub fn with_year_range(mut self, years: RangeInclusive<i32>) -> Self {
        self.years = years;
        self
    }

    pub fn extract_all(&self, text: &str) -> Vec<Entity> {
        let mut found = Vec::new();
        for rule in self.citations.rules() {
            for caps in rule.regex.captures_iter(text) {
                if let Some(entity) = self.score(rule, &caps) {
                    found.push(entity);
                }
            }
        }

        let entities = finalize(found);
        tracing::debug!(citations = entities.len(), "Citation extraction complete");
        entities
    }

    /// Parse positional fields and apply the rubric. `None` discards the match.
    fn score(&self, rule: &PatternRule, caps: &Captures<'_>) -> Option<Entity> {
        let whole = caps.get(0)?;
        let group = |name: &str| caps.name(name).map(|m| m.as_str().trim());

        let reporter = group("reporter")?;
        let year = group("year").and_then(|y| y.parse::<i32>().ok());
        let volume = group("volume").and_then(|v| v.parse::<u32>().ok());
        let page = group("page").and_then(|p| p.parse::<u32>().ok());
        let court = group("court");

        let mut confidence = 0.0;

        match year {
            Some(y) if self.years.contains(&y) => confidence += thresholds::YEAR_POINTS,
            Some(y) => {
                tracing::debug!(
                    rule = %rule.name,
                    year = y,
                    citation = whole.as_str(),
                    "Citation discarded: year out of range"
                );
                return None;
            }
            None if group("year").is_some() => return None,
            None => {}
        }

        if page.is_some_and(|p| (1..=thresholds::MAX_PAGE).contains(&p)) {
            confidence += thresholds::PAGE_POINTS;
        }

        let volume_by_design = !rule.has_group("volume");
        if volume_by_design || volume.is_some_and(|v| (1..=thresholds::MAX_VOLUME).contains(&v)) {
            confidence += thresholds::VOLUME_POINTS;
        }

        confidence += match court {
            Some(c) if self.courts.is_known(c) => thresholds::COURT_KNOWN_POINTS,
            _ => thresholds::COURT_PARTIAL_POINTS,
        };

        if self.citations.is_known(reporter) {
            confidence += thresholds::REPORTER_POINTS;
        }

        let key = citation_key(reporter, year, volume, court, page);
        let mut entity = Entity::new(
            EntityType::Citation,
            whole.as_str(),
            key,
            confidence,
            whole.start(),
        )
        .with_field("format", rule.name.as_str())
        .with_field("reporter", reporter.to_uppercase());

        if let Some(y) = year {
            entity = entity.with_field("year", y.to_string());
        }
        if let Some(v) = volume {
            entity = entity.with_field("volume", v.to_string());
        }
        if let Some(c) = court {
            entity = entity.with_field("court", c.to_uppercase());
        }
        if let Some(p) = page {
            entity = entity.with_field("page", p.to_string());
        }
        Some(entity)
    }
}

/// Citation pass: loads the citation and court sets through the cache.
#[derive(Debug, Default, Clone)]
pub struct CitationPass {
    years: Option<RangeInclusive<i32>>,
}

impl CitationPass {
    pub fn with_year_range(years: RangeInclusive<i32>) -> Self {
        Self { years: Some(years) }
    }
}

impl EntityPass for CitationPass {
    fn entity_type(&self) -> EntityType {
        EntityType::Citation
    }

    fn run(&self, text: &str, patterns: &PatternCache) -> Result<Vec<Entity>, PatternError> {
        let mut extractor = CitationExtractor::new(patterns.get(CITATIONS)?, patterns.get(COURTS)?);
        if let Some(years) = &self.years {
            extractor = extractor.with_year_range(years.clone());
        }
        Ok(extractor.extract_all(text))
    }
}
