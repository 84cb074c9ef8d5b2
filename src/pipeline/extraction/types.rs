use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::{ErrorClass, Interrupt};

/// Page break marker engines use between pages of extracted text.
pub const PAGE_BREAK: char = '\u{000C}';

// ═══════════════════════════════════════════════════════════
// Engine contract
// ═══════════════════════════════════════════════════════════

/// Engine-level failure. Every variant is either transient (worth another
/// attempt on the same engine) or permanent (skip to the next engine).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("engine process failed: {0}")]
    Process(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("document is encrypted")]
    Encrypted,

    #[error("engine crashed: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Io(_) | Self::Process(_) => ErrorClass::Transient,
            Self::Unavailable(_)
            | Self::Unsupported(_)
            | Self::Corrupt(_)
            | Self::Encrypted
            | Self::Internal(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Raw output of a text engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    /// Extracted text; pages may be separated by `PAGE_BREAK`.
    pub text: String,
    /// Page count when the engine knows it.
    pub page_count: Option<usize>,
}

impl EngineOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_count: None,
        }
    }

    pub fn with_pages(mut self, page_count: usize) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// A text-extraction backend. Implementations are blocking and are driven
/// from `spawn_blocking` by the fallback extractor.
pub trait TextEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Extract text. `max_pages` is a hint used for cheap sampling; engines
    /// that cannot honor it may return everything.
    fn extract(&self, bytes: &[u8], max_pages: Option<usize>) -> Result<EngineOutput, EngineError>;
}

/// Raw output of an OCR engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence in [0, 1].
    pub confidence: f64,
    pub page_count: Option<usize>,
}

/// OCR backend (allows mocking for tests).
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, bytes: &[u8]) -> Result<OcrOutput, EngineError>;
}

// ═══════════════════════════════════════════════════════════
// Fallback results
// ═══════════════════════════════════════════════════════════

/// Heuristic quality of accepted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// How one engine try ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Output accepted as the document text.
    Accepted,
    /// Engine ran but produced too little text.
    InsufficientText,
    /// Transient errors exhausted the retry budget.
    Exhausted,
    /// A permanent error stopped this engine.
    Permanent,
    /// The engine's circuit was open.
    CircuitOpen,
    /// Deadline or cancellation cut the try short.
    Interrupted,
}

/// One engine try, including its retries. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub succeeded: bool,
    pub outcome: AttemptOutcome,
    pub extracted_text: String,
    pub page_count: usize,
    pub error: Option<String>,
    /// Engine invocations made under the retry policy.
    pub calls: u32,
}

/// Text of one page, 1-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

/// Result of a successful fallback extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFallbackResult {
    pub final_text: String,
    pub engine_used: Option<String>,
    /// True when the accepted text came from OCR.
    pub is_scanned: bool,
    pub ocr_confidence: Option<f64>,
    pub quality_tier: QualityTier,
    /// SHA-256 of the raw input, base64-encoded.
    pub content_hash: String,
    pub page_count: usize,
    pub pages: Vec<PageText>,
    /// Words per page seen by the scanned-document heuristic, when it ran.
    pub sample_words_per_page: Option<f64>,
    pub attempts: Vec<ExtractionAttempt>,
}

#[derive(Error, Debug, Clone)]
pub enum FallbackError {
    #[error("all extraction engines failed ({} attempts)", attempts.len())]
    Exhausted { attempts: Vec<ExtractionAttempt> },

    #[error("extraction interrupted: {interrupt}")]
    Interrupted {
        interrupt: Interrupt,
        attempts: Vec<ExtractionAttempt>,
    },
}

impl FallbackError {
    pub fn attempts(&self) -> &[ExtractionAttempt] {
        match self {
            Self::Exhausted { attempts } | Self::Interrupted { attempts, .. } => attempts,
        }
    }

    /// True when every engine was short-circuited by an open breaker.
    pub fn all_circuits_open(&self) -> bool {
        let attempts = self.attempts();
        !attempts.is_empty()
            && attempts
                .iter()
                .all(|a| a.outcome == AttemptOutcome::CircuitOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_io_are_transient() {
        assert!(EngineError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(EngineError::Io("reset".into()).is_transient());
        assert!(EngineError::Process("exit 1".into()).is_transient());
    }

    #[test]
    fn structural_errors_are_permanent() {
        assert_eq!(EngineError::Encrypted.class(), ErrorClass::Permanent);
        assert_eq!(EngineError::Corrupt("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(
            EngineError::Unavailable("tesseract".into()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn exhausted_error_names_attempt_count() {
        let attempt = ExtractionAttempt {
            engine: "utf8_text".into(),
            started_at: Utc::now(),
            duration_ms: 1,
            succeeded: false,
            outcome: AttemptOutcome::CircuitOpen,
            extracted_text: String::new(),
            page_count: 0,
            error: Some("circuit open".into()),
            calls: 0,
        };
        let err = FallbackError::Exhausted {
            attempts: vec![attempt.clone(), attempt],
        };
        assert!(err.to_string().contains("2 attempts"));
        assert!(err.all_circuits_open());
    }
}
