use std::collections::HashSet;

use super::types::QualityTier;

/// Tier thresholds for accepted text.
pub mod thresholds {
    /// Below this special-character ratio text can be high tier.
    pub const HIGH_MAX_SPECIAL_RATIO: f64 = 0.10;
    /// Above this special-character ratio text is low tier.
    pub const LOW_MIN_SPECIAL_RATIO: f64 = 0.30;

    /// Plausible average word length for high tier.
    pub const HIGH_WORD_LEN: (f64, f64) = (3.0, 8.0);
    /// Outside this range text is low tier.
    pub const LOW_WORD_LEN: (f64, f64) = (2.0, 12.0);

    pub const HIGH_MIN_DISTINCT_CHARS: usize = 20;
    pub const LOW_MIN_DISTINCT_CHARS: usize = 10;
}

/// Character statistics behind the tier decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStats {
    /// Share of non-whitespace characters that are not alphanumeric.
    pub special_ratio: f64,
    pub avg_word_len: f64,
    pub distinct_chars: usize,
    pub word_count: usize,
}

pub fn text_stats(text: &str) -> TextStats {
    let mut visible = 0usize;
    let mut special = 0usize;
    let mut distinct = HashSet::new();
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        visible += 1;
        if !c.is_alphanumeric() {
            special += 1;
        }
        distinct.insert(c);
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let word_chars: usize = words.iter().map(|w| w.chars().count()).sum();

    TextStats {
        special_ratio: if visible == 0 {
            1.0
        } else {
            special as f64 / visible as f64
        },
        avg_word_len: if words.is_empty() {
            0.0
        } else {
            word_chars as f64 / words.len() as f64
        },
        distinct_chars: distinct.len(),
        word_count: words.len(),
    }
}

/// Grade accepted text: a low special-character ratio and plausible word
/// lengths mean higher tier.
pub fn assess_quality_tier(text: &str) -> QualityTier {
    use thresholds::*;

    let stats = text_stats(text);
    let (low_min, low_max) = LOW_WORD_LEN;
    if stats.word_count == 0
        || stats.special_ratio > LOW_MIN_SPECIAL_RATIO
        || stats.avg_word_len < low_min
        || stats.avg_word_len > low_max
        || stats.distinct_chars < LOW_MIN_DISTINCT_CHARS
    {
        return QualityTier::Low;
    }

    let (high_min, high_max) = HIGH_WORD_LEN;
    if stats.special_ratio < HIGH_MAX_SPECIAL_RATIO
        && (high_min..=high_max).contains(&stats.avg_word_len)
        && stats.distinct_chars >= HIGH_MIN_DISTINCT_CHARS
    {
        QualityTier::High
    } else {
        QualityTier::Medium
    }
}
