//! The externally visible per-document result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entities::{Entity, EntityType};
use super::extraction::EngineFallbackResult;
use super::metadata::DocumentMetadata;
use super::quality::QualityReport;

/// Stage names used in the execution log.
pub mod stages {
    pub const VALIDATION: &str = "validation";
    pub const EXTRACTION: &str = "extraction";
    /// Prefix of per-engine sub-entries, e.g. `extract:utf8_text`.
    pub const ENGINE_PREFIX: &str = "extract:";
    pub const NORMALIZATION: &str = "normalization";
    /// Prefix of per-pass entries, e.g. `entities:citation`.
    pub const ENTITY_PREFIX: &str = "entities:";
    pub const SCORING: &str = "scoring";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Partial,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    /// Stage failed but the document continued with an empty contribution.
    Degraded,
    Failed,
    /// Stage never ran because an earlier stage aborted the document.
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// What kind of failure a stage reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    ExtractionExhausted,
    CircuitOpen,
    PatternConfig,
    Timeout,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::ExtractionExhausted => "extraction exhausted",
            Self::CircuitOpen => "circuit open",
            Self::PatternConfig => "pattern config",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        })
    }
}

/// A stage-level failure: which stage, what category, and the cause.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("stage '{stage}' failed ({category}): {message}")]
pub struct StageError {
    pub stage: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl StageError {
    pub fn new(stage: &str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            category,
            message: message.into(),
        }
    }
}

/// One execution log entry. Every stage invocation appends exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: String,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl StageLogEntry {
    pub fn success(stage: &str, duration_ms: u64) -> Self {
        Self {
            stage: stage.to_string(),
            status: StageStatus::Success,
            duration_ms,
            error: None,
            category: None,
        }
    }

    pub fn from_error(status: StageStatus, error: &StageError, duration_ms: u64) -> Self {
        Self {
            stage: error.stage.clone(),
            status,
            duration_ms,
            error: Some(error.message.clone()),
            category: Some(error.category),
        }
    }

    pub fn skipped(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            status: StageStatus::Skipped,
            duration_ms: 0,
            error: None,
            category: None,
        }
    }
}

/// Final result for one document. Written once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub document_id: String,
    pub status: RecordStatus,
    pub content_hash: String,
    pub extraction: Option<EngineFallbackResult>,
    /// Normalized document text fed to the entity passes.
    pub text: String,
    pub entities: BTreeMap<EntityType, Vec<Entity>>,
    pub metadata: Option<DocumentMetadata>,
    pub quality: Option<QualityReport>,
    pub execution_log: Vec<StageLogEntry>,
    /// Set when status is `failed`.
    pub failure: Option<StageError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineRecord {
    pub fn entities_of(&self, kind: EntityType) -> &[Entity] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary(&self, kind: EntityType) -> Option<&Entity> {
        self.entities_of(kind).iter().find(|e| e.is_primary)
    }

    /// Latest log entry for `stage`.
    pub fn stage(&self, stage: &str) -> Option<&StageLogEntry> {
        self.execution_log.iter().rev().find(|e| e.stage == stage)
    }

    pub fn engine_entries(&self) -> impl Iterator<Item = &StageLogEntry> {
        self.execution_log
            .iter()
            .filter(|e| e.stage.starts_with(stages::ENGINE_PREFIX))
    }

    pub fn is_failed(&self) -> bool {
        self.status == RecordStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_display_is_human_readable() {
        assert_eq!(ErrorCategory::ExtractionExhausted.to_string(), "extraction exhausted");
        assert_eq!(
            serde_json::to_string(&ErrorCategory::ExtractionExhausted).unwrap(),
            "\"extraction_exhausted\""
        );
    }

    #[test]
    fn stage_error_names_stage_and_category() {
        let err = StageError::new(stages::EXTRACTION, ErrorCategory::Timeout, "deadline exceeded");
        assert_eq!(
            err.to_string(),
            "stage 'extraction' failed (timeout): deadline exceeded"
        );
        let entry = StageLogEntry::from_error(StageStatus::Failed, &err, 12);
        assert_eq!(entry.stage, "extraction");
        assert_eq!(entry.category, Some(ErrorCategory::Timeout));
    }
}
