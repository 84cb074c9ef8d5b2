use std::ops::RangeInclusive;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

use super::patterns::{PatternCache, PatternError};
use super::types::{finalize, Entity, EntityPass, EntityType};

pub mod thresholds {
    pub const YEAR_POINTS: f64 = 0.40;
    pub const CALENDAR_POINTS: f64 = 0.40;
    pub const CONTEXT_POINTS: f64 = 0.20;
    /// Characters before a date searched for a legal context word.
    pub const CONTEXT_WINDOW: usize = 40;
    pub const EARLIEST_YEAR: i32 = 1800;
    pub const LATEST_YEAR: i32 = 2099;
}

const MONTHS: &str = r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static ISO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<year>\d{4})-(?P<month>\d{1,2})-(?P<day>\d{1,2})\b").expect("valid regex")
});

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<day>\d{1,2})[./](?P<month>\d{1,2})[./](?P<year>\d{4})\b")
        .expect("valid regex")
});

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?P<day>\d{{1,2}})(?:st|nd|rd|th)?\s+(?:day\s+of\s+)?(?P<month>{MONTHS})\.?,?\s+(?P<year>\d{{4}})\b"
    ))
    .expect("valid regex")
});

static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?P<month>{MONTHS})\.?\s+(?P<day>\d{{1,2}})(?:st|nd|rd|th)?,?\s+(?P<year>\d{{4}})\b"
    ))
    .expect("valid regex")
});

static CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:dated|decided|judgment|judgement|delivered|hearing|heard|order)\b")
        .expect("valid regex")
});

/// Month number from a numeric or (abbreviated) English month name.
fn month_number(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let prefix: String = raw.chars().take(3).collect::<String>().to_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Whether a legal context word occurs shortly before `offset`.
fn has_context(text: &str, offset: usize) -> bool {
    let mut start = offset.saturating_sub(thresholds::CONTEXT_WINDOW);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    CONTEXT.is_match(&text[start..offset])
}

/// Date pass: numeric and written dates, normalized to ISO `YYYY-MM-DD`.
#[derive(Debug, Clone)]
pub struct DatePass {
    years: RangeInclusive<i32>,
}

impl Default for DatePass {
    fn default() -> Self {
        Self {
            years: thresholds::EARLIEST_YEAR..=thresholds::LATEST_YEAR,
        }
    }
}

impl DatePass {
    pub fn with_year_range(years: RangeInclusive<i32>) -> Self {
        Self { years }
    }

    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let found = [&*ISO, &*NUMERIC, &*DAY_MONTH_YEAR, &*MONTH_DAY_YEAR]
            .into_iter()
            .flat_map(|re| re.captures_iter(text))
            .filter_map(|caps| self.score(text, &caps))
            .collect();
        finalize(found)
    }

    fn score(&self, text: &str, caps: &Captures<'_>) -> Option<Entity> {
        let whole = caps.get(0)?;
        let year: i32 = caps.name("year")?.as_str().parse().ok()?;
        let month = month_number(caps.name("month")?.as_str())?;
        let day: u32 = caps.name("day")?.as_str().parse().ok()?;

        if !self.years.contains(&year) {
            return None;
        }
        // Impossible dates such as 31.02.1998 are not dates at all.
        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        let context = has_context(text, whole.start());
        let mut confidence = thresholds::YEAR_POINTS + thresholds::CALENDAR_POINTS;
        if context {
            confidence += thresholds::CONTEXT_POINTS;
        }

        Some(
            Entity::new(
                EntityType::Date,
                whole.as_str(),
                date.format("%Y-%m-%d").to_string(),
                confidence,
                whole.start(),
            )
            .with_field("year", year.to_string())
            .with_field("context", context.to_string()),
        )
    }
}

impl EntityPass for DatePass {
    fn entity_type(&self) -> EntityType {
        EntityType::Date
    }

    fn run(&self, text: &str, _patterns: &PatternCache) -> Result<Vec<Entity>, PatternError> {
        Ok(self.extract(text))
    }
}
