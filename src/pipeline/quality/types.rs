use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::pipeline::entities::{Entity, EntityType};
use crate::pipeline::extraction::EngineFallbackResult;
use crate::pipeline::metadata::DocumentMetadata;

/// The five fixed quality dimensions, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Completeness,
    CitationQuality,
    TextQuality,
    MetadataValidity,
    Consistency,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 5] = [
        Self::Completeness,
        Self::CitationQuality,
        Self::TextQuality,
        Self::MetadataValidity,
        Self::Consistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::CitationQuality => "citation_quality",
            Self::TextQuality => "text_quality",
            Self::MetadataValidity => "metadata_validity",
            Self::Consistency => "consistency",
        }
    }
}

/// Dimension weights. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub completeness: f64,
    pub citation_quality: f64,
    pub text_quality: f64,
    pub metadata_validity: f64,
    pub consistency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.25,
            citation_quality: 0.20,
            text_quality: 0.20,
            metadata_validity: 0.20,
            consistency: 0.15,
        }
    }
}

impl QualityWeights {
    const TOLERANCE: f64 = 1e-6;

    pub fn weight(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::Completeness => self.completeness,
            QualityDimension::CitationQuality => self.citation_quality,
            QualityDimension::TextQuality => self.text_quality,
            QualityDimension::MetadataValidity => self.metadata_validity,
            QualityDimension::Consistency => self.consistency,
        }
    }

    pub fn sum(&self) -> f64 {
        QualityDimension::ALL.iter().map(|d| self.weight(*d)).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.sum();
        let negative = QualityDimension::ALL.iter().any(|d| self.weight(*d) < 0.0);
        if negative || (sum - 1.0).abs() > Self::TOLERANCE {
            return Err(ConfigError::InvalidWeights { sum });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unacceptable,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.90 => Self::Excellent,
            s if s >= 0.75 => Self::Good,
            s if s >= 0.60 => Self::Acceptable,
            s if s >= 0.40 => Self::Poor,
            _ => Self::Unacceptable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    NeedsReview,
    Invalid,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::NeedsReview => "needs_review",
            Self::Invalid => "invalid",
        }
    }
}

/// Quality verdict for one document. Contains no timestamps, so scoring the
/// same record twice gives identical reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub dimension_scores: BTreeMap<QualityDimension, f64>,
    pub overall_score: f64,
    pub grade: Grade,
    pub validation_status: ValidationStatus,
    pub needs_manual_review: bool,
    /// Which manual-review triggers fired.
    pub review_reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub fn score(&self, dimension: QualityDimension) -> f64 {
        self.dimension_scores.get(&dimension).copied().unwrap_or(0.0)
    }
}

/// Everything the scorer looks at, borrowed from the record under assembly.
#[derive(Debug, Clone, Copy)]
pub struct AssembledRecord<'a> {
    /// Normalized document text.
    pub text: &'a str,
    pub extraction: Option<&'a EngineFallbackResult>,
    pub entities: &'a BTreeMap<EntityType, Vec<Entity>>,
    pub metadata: &'a DocumentMetadata,
}

impl<'a> AssembledRecord<'a> {
    pub fn entities_of(&self, kind: EntityType) -> &'a [Entity] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = QualityWeights::default();
        assert!((w.sum() - 1.0).abs() < 1e-9);
        assert!(w.validate().is_ok());
    }

    #[test]
    fn skewed_or_negative_weights_rejected() {
        let w = QualityWeights {
            completeness: 0.5,
            ..QualityWeights::default()
        };
        assert!(matches!(w.validate(), Err(ConfigError::InvalidWeights { .. })));

        let w = QualityWeights {
            completeness: -0.25,
            citation_quality: 0.70,
            ..QualityWeights::default()
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(Grade::from_score(0.95), Grade::Excellent);
        assert_eq!(Grade::from_score(0.90), Grade::Excellent);
        assert_eq!(Grade::from_score(0.75), Grade::Good);
        assert_eq!(Grade::from_score(0.60), Grade::Acceptable);
        assert_eq!(Grade::from_score(0.40), Grade::Poor);
        assert_eq!(Grade::from_score(0.39), Grade::Unacceptable);
    }

    #[test]
    fn dimension_scores_serialize_as_named_keys() {
        let mut scores = BTreeMap::new();
        scores.insert(QualityDimension::CitationQuality, 0.5);
        let json = serde_json::to_string(&scores).unwrap();
        assert_eq!(json, r#"{"citation_quality":0.5}"#);
    }
}
