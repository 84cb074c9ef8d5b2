use std::sync::LazyLock;

use regex::Regex;

use super::patterns::{PatternCache, PatternError};
use super::types::{finalize, Entity, EntityPass, EntityType};

pub mod thresholds {
    pub const CAPTION_POINTS: f64 = 0.40;
    pub const LENGTH_POINTS: f64 = 0.30;
    pub const FORM_POINTS: f64 = 0.30;
    pub const MIN_WORDS: usize = 2;
    pub const MAX_WORDS: usize = 12;
}

/// `A v. B` on one line.
static INLINE_CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<first>[^\n]{2,160}?)[ \t]+(?i:v\.|vs\.?|versus)[ \t]+(?P<second>[^\n]{2,160})$")
        .expect("valid regex")
});

/// `A` / `Versus` / `B` on three lines.
static STACKED_CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<first>[^\n]{2,160})\n[ \t]*(?i:v\.?|vs\.?|versus)[ \t]*\n(?P<second>[^\n]{2,160})$")
        .expect("valid regex")
});

/// Trailing procedural role, e.g. `....Petitioner` or `- Respondents`.
static ROLE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[\s.,:\-]*\b(?:petitioners?|respondents?|appellants?|plaintiffs?|defendants?|applicants?|complainants?|opposite\s+part(?:y|ies)|accused)\b[\s.,:\-]*$",
    )
    .expect("valid regex")
});

static ORGANISATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:state|government|bangladesh|republic|ltd|limited|bank|corporation|company|authority|commission(?:er)?|ministry|board|union|secretary|municipal|university)\b",
    )
    .expect("valid regex")
});

/// Remove role suffixes and decoration, collapse whitespace.
fn clean_name(raw: &str) -> String {
    let stripped = ROLE_SUFFIX.replace(raw, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric() && c != ')')
        .to_string()
}

fn looks_like_name(name: &str) -> bool {
    if ORGANISATION.is_match(name) {
        return true;
    }
    let mut words = name
        .split_whitespace()
        .filter(|w| w.chars().next().is_some_and(char::is_alphabetic))
        .peekable();
    words.peek().is_some() && words.all(|w| w.chars().next().is_some_and(char::is_uppercase))
}

/// Case caption parties. Each side becomes one entity with a `role` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct PartyPass;

impl PartyPass {
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut found = Vec::new();
        for re in [&*STACKED_CAPTION, &*INLINE_CAPTION] {
            for caps in re.captures_iter(text) {
                for role in ["first", "second"] {
                    if let Some(side) = caps.name(role) {
                        if let Some(entity) = Self::score(side.as_str(), side.start(), role) {
                            found.push(entity);
                        }
                    }
                }
            }
        }
        finalize(found)
    }

    fn score(raw: &str, offset: usize, role: &str) -> Option<Entity> {
        let name = clean_name(raw);
        if !name.chars().any(char::is_alphabetic) {
            return None;
        }

        let words = name.split_whitespace().count();
        let mut confidence = thresholds::CAPTION_POINTS;
        if (thresholds::MIN_WORDS..=thresholds::MAX_WORDS).contains(&words) {
            confidence += thresholds::LENGTH_POINTS;
        }
        if looks_like_name(&name) {
            confidence += thresholds::FORM_POINTS;
        }

        Some(
            Entity::new(EntityType::Party, raw.trim_end(), name, confidence, offset)
                .with_field("role", role),
        )
    }
}

impl EntityPass for PartyPass {
    fn entity_type(&self) -> EntityType {
        EntityType::Party
    }

    fn run(&self, text: &str, _patterns: &PatternCache) -> Result<Vec<Entity>, PatternError> {
        Ok(self.extract(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_caption_yields_both_sides() {
        let parties = PartyPass.extract("Abdul Karim v. The State");
        assert_eq!(parties.len(), 2);
        let first = parties.iter().find(|p| p.field("role") == Some("first")).unwrap();
        let second = parties.iter().find(|p| p.field("role") == Some("second")).unwrap();
        assert_eq!(first.normalized_form, "Abdul Karim");
        assert_eq!(second.normalized_form, "The State");
        assert_eq!(first.confidence, 1.0);
        assert_eq!(parties.iter().filter(|p| p.is_primary).count(), 1);
        assert!(parties[0].is_primary);
        assert_eq!(parties[0].field("role"), Some("first"));
    }

    #[test]
    fn stacked_caption_strips_roles() {
        let text = "IN THE SUPREME COURT\nMd. Rahim Uddin ....Petitioner\nVersus\nBangladesh Bank and others ....Respondents\nJudgment";
        let parties = PartyPass.extract(text);
        let names: Vec<_> = parties.iter().map(|p| p.normalized_form.as_str()).collect();
        assert!(names.contains(&"Md. Rahim Uddin"), "{names:?}");
        assert!(names.contains(&"Bangladesh Bank and others"), "{names:?}");
        assert_eq!(parties.len(), 2);
    }

    #[test]
    fn lowercase_single_word_scores_low() {
        let parties = PartyPass.extract("foo vs bar");
        assert_eq!(parties.len(), 2);
        assert!(parties.iter().all(|p| p.confidence == 0.4));
    }

    #[test]
    fn role_suffix_removal() {
        assert_eq!(clean_name("Abdul Karim -- Appellant"), "Abdul Karim");
        assert_eq!(clean_name("Rahima Khatun and others.....Opposite Parties"), "Rahima Khatun and others");
        assert_eq!(clean_name("The State"), "The State");
    }

    #[test]
    fn no_caption_is_empty() {
        assert!(PartyPass.extract("The appeal is dismissed without costs.").is_empty());
    }
}
