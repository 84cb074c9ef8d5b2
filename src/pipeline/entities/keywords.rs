use super::patterns::{PatternCache, PatternError, PatternSet, KEYWORDS};
use super::types::{clamp_confidence, rank_and_mark_primary, Entity, EntityPass, EntityType};

pub mod thresholds {
    pub const BASE: f64 = 0.40;
    pub const PER_REPEAT: f64 = 0.15;
}

/// Confidence for a vocabulary term seen `occurrences` times.
pub fn keyword_confidence(occurrences: usize) -> f64 {
    if occurrences == 0 {
        return 0.0;
    }
    clamp_confidence(thresholds::BASE + thresholds::PER_REPEAT * (occurrences - 1) as f64)
}

/// Legal vocabulary hits. One entity per registry term found, anchored at
/// its first occurrence.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordPass;

impl KeywordPass {
    pub fn extract(&self, text: &str, vocabulary: &PatternSet) -> Vec<Entity> {
        let mut found: Vec<Entity> = vocabulary
            .terms()
            .iter()
            .filter_map(|term| {
                let mut hits = term.matcher().find_iter(text);
                let first = hits.next()?;
                let occurrences = 1 + hits.count();
                Some(
                    Entity::new(
                        EntityType::Keyword,
                        first.as_str(),
                        term.code.as_str(),
                        keyword_confidence(occurrences),
                        first.start(),
                    )
                    .with_field("label", term.label.as_str())
                    .with_field("occurrences", occurrences.to_string()),
                )
            })
            .collect();
        rank_and_mark_primary(&mut found);
        found
    }
}

impl EntityPass for KeywordPass {
    fn entity_type(&self) -> EntityType {
        EntityType::Keyword
    }

    fn run(&self, text: &str, patterns: &PatternCache) -> Result<Vec<Entity>, PatternError> {
        let vocabulary = patterns.get(KEYWORDS)?;
        Ok(self.extract(text, &vocabulary))
    }
}
