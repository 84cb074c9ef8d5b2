//! Cheap "is this a scanned document?" heuristic.
//!
//! A digital document yields plenty of words per page from its text layer;
//! an image-only scan yields almost none. The sample comes from a leading
//! extraction with `max_pages` set, so it costs a fraction of a full pass.

use serde::{Deserialize, Serialize};

use super::types::EngineOutput;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanAssessment {
    pub pages_sampled: usize,
    pub words_per_page: f64,
    pub is_scanned: bool,
}

/// Judge a sample against the words-per-page threshold.
pub fn assess_sample(
    sample: &EngineOutput,
    sample_pages: usize,
    words_per_page_threshold: usize,
) -> ScanAssessment {
    let reported = sample.page_count.unwrap_or(1).max(1);
    let pages_sampled = reported.min(sample_pages.max(1));

    // Engines that ignore `max_pages` return the whole document; scale the
    // word count down to the sampled share.
    let words = sample.text.split_whitespace().count() as f64;
    let words_in_sample = words * pages_sampled as f64 / reported as f64;
    let words_per_page = words_in_sample / pages_sampled as f64;

    ScanAssessment {
        pages_sampled,
        words_per_page,
        is_scanned: words_per_page < words_per_page_threshold as f64,
    }
}
