use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::patterns::{PatternCache, PatternError, PatternSet, STATUTES};
use super::types::{finalize, Entity, EntityPass, EntityType};

pub mod thresholds {
    pub const NUMBER_POINTS: f64 = 0.50;
    pub const STATUTE_POINTS: f64 = 0.30;
    pub const REGISTRY_POINTS: f64 = 0.20;
}

/// Optional `of (the) <Capitalised Statute Name>[, 1860]` tail.
const STATUTE_TAIL: &str =
    r"(?:\s+of\s+(?:the\s+)?(?P<statute>[A-Z][A-Za-z]*(?:\s+(?:of|and|[A-Z][A-Za-z]*)\b)*(?:,\s*\d{4})?))?";

static SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?i:sections?|ss?\.)\s*(?P<number>\d+[A-Z]?(?:\(\d+\))?){STATUTE_TAIL}"
    ))
    .expect("valid regex")
});

static ARTICLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?i:articles?|art\.)\s*(?P<number>\d+[A-Z]?(?:\(\d+\))?){STATUTE_TAIL}"
    ))
    .expect("valid regex")
});

static ORDER_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?i:order)\s+(?P<order>[IVXLC]+)\s*,?\s*(?i:rules?|r\.)\s*(?P<number>\d+[A-Z]?){STATUTE_TAIL}"
    ))
    .expect("valid regex")
});

/// Drop a dangling connective the greedy statute group may pick up.
fn trim_statute(raw: &str) -> &str {
    let mut s = raw.trim();
    loop {
        let trimmed = s
            .strip_suffix(" of")
            .or_else(|| s.strip_suffix(" and"))
            .map(str::trim_end);
        match trimmed {
            Some(t) => s = t,
            None => return s,
        }
    }
}

/// Statutory provision references: sections, articles and order/rule pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SectionPass;

impl SectionPass {
    pub fn extract(&self, text: &str, statutes: &PatternSet) -> Vec<Entity> {
        let kinds: [(&str, &Regex); 3] = [
            ("section", &*SECTION),
            ("article", &*ARTICLE),
            ("order", &*ORDER_RULE),
        ];
        let mut found = Vec::new();
        for (kind, re) in kinds {
            for caps in re.captures_iter(text) {
                if let Some(entity) = Self::score(kind, &caps, statutes) {
                    found.push(entity);
                }
            }
        }
        finalize(found)
    }

    fn score(kind: &str, caps: &Captures<'_>, statutes: &PatternSet) -> Option<Entity> {
        let whole = caps.get(0)?;
        let number = caps.name("number")?.as_str();
        let provision = match caps.name("order") {
            Some(order) => format!("order {} rule {number}", order.as_str()),
            None => format!("{kind} {number}"),
        };

        let mut confidence = thresholds::NUMBER_POINTS;
        let statute = caps
            .name("statute")
            .map(|m| trim_statute(m.as_str()))
            .filter(|s| !s.is_empty());
        let known = statute.and_then(|s| statutes.lookup(s).or_else(|| statutes.find_term(s)));

        if statute.is_some() {
            confidence += thresholds::STATUTE_POINTS;
        }
        if known.is_some() {
            confidence += thresholds::REGISTRY_POINTS;
        }

        let normalized = match (known, statute) {
            (Some(term), _) => format!("{provision}, {}", term.label),
            (None, Some(s)) => format!("{provision}, {s}"),
            (None, None) => provision,
        };

        let mut raw = whole.as_str();
        if let (Some(s), Some(m)) = (statute, caps.name("statute")) {
            // Keep raw text in step with the trimmed statute name.
            let end = m.start() + s.len() - whole.start();
            raw = &whole.as_str()[..end];
        }

        let mut entity = Entity::new(EntityType::Section, raw, normalized, confidence, whole.start())
            .with_field("kind", kind)
            .with_field("number", number);
        if let Some(s) = statute {
            entity = entity.with_field("statute", s);
        }
        if let Some(term) = known {
            entity = entity.with_field("statute_code", term.code.as_str());
        }
        Some(entity)
    }
}

impl EntityPass for SectionPass {
    fn entity_type(&self) -> EntityType {
        EntityType::Section
    }

    fn run(&self, text: &str, patterns: &PatternCache) -> Result<Vec<Entity>, PatternError> {
        let statutes = patterns.get(STATUTES)?;
        Ok(self.extract(text, &statutes))
    }
}
