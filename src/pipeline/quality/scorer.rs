use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::dimensions::{self, Completeness, Consistency};
use super::types::{AssembledRecord, Grade, QualityDimension, QualityReport, ValidationStatus};
use crate::config::{ConfigError, QualitySettings};

/// Validation status cut-offs.
pub mod thresholds {
    pub const VALID: f64 = 0.75;
    pub const NEEDS_REVIEW: f64 = 0.50;
    pub const STRICT_VALID: f64 = 0.85;
    pub const STRICT_NEEDS_REVIEW: f64 = 0.65;
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Weighted five-dimension quality scorer.
pub struct QualityScorer {
    settings: QualitySettings,
    reference_date: Option<NaiveDate>,
}

impl QualityScorer {
    /// Fails when the dimension weights are negative or do not sum to 1.0.
    pub fn new(settings: QualitySettings) -> Result<Self, ConfigError> {
        settings.weights.validate()?;
        Ok(Self {
            settings,
            reference_date: None,
        })
    }

    /// Pin "today" for consistency checks. Defaults to the current UTC date.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn settings(&self) -> &QualitySettings {
        &self.settings
    }

    pub fn status_for(&self, overall: f64) -> ValidationStatus {
        let (valid, review) = if self.settings.strict {
            (thresholds::STRICT_VALID, thresholds::STRICT_NEEDS_REVIEW)
        } else {
            (thresholds::VALID, thresholds::NEEDS_REVIEW)
        };
        if overall >= valid {
            ValidationStatus::Valid
        } else if overall >= review {
            ValidationStatus::NeedsReview
        } else {
            ValidationStatus::Invalid
        }
    }

    pub fn score(&self, record: &AssembledRecord<'_>) -> QualityReport {
        let today = self
            .reference_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive());

        let completeness = dimensions::completeness(record);
        let consistency = dimensions::consistency(record, today);

        let mut scores = BTreeMap::new();
        scores.insert(QualityDimension::Completeness, round4(completeness.score));
        scores.insert(
            QualityDimension::CitationQuality,
            round4(dimensions::citation_quality(record)),
        );
        scores.insert(
            QualityDimension::TextQuality,
            round4(dimensions::text_quality(record)),
        );
        scores.insert(
            QualityDimension::MetadataValidity,
            round4(dimensions::metadata_validity(record)),
        );
        scores.insert(QualityDimension::Consistency, round4(consistency.score));

        let weights = &self.settings.weights;
        let overall = round4(
            scores
                .iter()
                .map(|(d, s)| weights.weight(*d) * s)
                .sum::<f64>()
                .clamp(0.0, 1.0),
        );

        let review_reasons = self.review_reasons(record, &scores, overall);
        let recommendations = self.recommendations(&scores, &completeness, &consistency);
        let validation_status = self.status_for(overall);

        tracing::debug!(
            overall,
            status = validation_status.as_str(),
            manual_review = !review_reasons.is_empty(),
            "Quality scored"
        );

        QualityReport {
            dimension_scores: scores,
            overall_score: overall,
            grade: Grade::from_score(overall),
            validation_status,
            needs_manual_review: !review_reasons.is_empty(),
            review_reasons,
            recommendations,
        }
    }

    /// Independent manual-review triggers; any one is enough.
    fn review_reasons(
        &self,
        record: &AssembledRecord<'_>,
        scores: &BTreeMap<QualityDimension, f64>,
        overall: f64,
    ) -> Vec<String> {
        let s = &self.settings;
        let mut reasons = Vec::new();

        if overall < s.manual_review_below {
            reasons.push(format!(
                "overall score {overall:.2} is below {:.2}",
                s.manual_review_below
            ));
        }
        for (dimension, score) in scores {
            if *score < s.dimension_floor {
                reasons.push(format!(
                    "{} score {score:.2} is below {:.2}",
                    dimension.as_str(),
                    s.dimension_floor
                ));
            }
        }
        if let Some(ocr) = record.extraction.and_then(|e| e.ocr_confidence) {
            if ocr < s.ocr_confidence_floor {
                reasons.push(format!(
                    "OCR confidence {ocr:.2} is below {:.2}",
                    s.ocr_confidence_floor
                ));
            }
        }
        if record.metadata.title.is_none() {
            reasons.push("title is missing".to_string());
        }
        if record.metadata.primary_date.is_none() {
            reasons.push("primary date is missing".to_string());
        }
        reasons
    }

    fn recommendations(
        &self,
        scores: &BTreeMap<QualityDimension, f64>,
        completeness: &Completeness,
        consistency: &Consistency,
    ) -> Vec<String> {
        let below = self.settings.recommendation_below;
        scores
            .iter()
            .filter(|(_, score)| **score < below)
            .map(|(dimension, score)| match dimension {
                QualityDimension::Completeness => format!(
                    "Completeness is {score:.2}: {}. Check the source document for the missing fields.",
                    completeness.missing.join("; ")
                ),
                QualityDimension::CitationQuality => format!(
                    "Citation quality is {score:.2}: verify citations manually or extend the citation patterns."
                ),
                QualityDimension::TextQuality => format!(
                    "Text quality is {score:.2}: re-scan the document at higher resolution or supply a digital copy."
                ),
                QualityDimension::MetadataValidity => format!(
                    "Metadata validity is {score:.2}: review extracted dates, parties and sections."
                ),
                QualityDimension::Consistency => format!(
                    "Consistency is {score:.2}: {}.",
                    consistency.failures.join("; ")
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entities::{Entity, EntityType};
    use crate::pipeline::extraction::{EngineFallbackResult, QualityTier};
    use crate::pipeline::metadata::DocumentMetadata;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn extraction(tier: QualityTier, ocr: Option<f64>) -> EngineFallbackResult {
        EngineFallbackResult {
            final_text: "x".repeat(300),
            engine_used: Some("utf8_text".into()),
            is_scanned: ocr.is_some(),
            ocr_confidence: ocr,
            quality_tier: tier,
            content_hash: "h".into(),
            page_count: 1,
            pages: vec![],
            sample_words_per_page: None,
            attempts: vec![],
        }
    }

    fn full_entities() -> BTreeMap<EntityType, Vec<Entity>> {
        let mut entities = BTreeMap::new();
        entities.insert(
            EntityType::Citation,
            vec![Entity::new(EntityType::Citation, "c", "DLR:1998:22:HCD:205", 1.0, 0)
                .with_field("year", "1998")
                .with_field("reporter", "DLR")
                .with_field("page", "205")],
        );
        entities.insert(
            EntityType::Date,
            vec![Entity::new(EntityType::Date, "d", "1999-01-12", 1.0, 0)],
        );
        entities
    }

    fn full_metadata() -> DocumentMetadata {
        DocumentMetadata {
            title: Some("Abdul Karim v. The State".into()),
            primary_date: NaiveDate::from_ymd_opt(1999, 1, 12),
            parties: vec!["Abdul Karim".into(), "The State".into()],
            total_citations: 1,
            ..Default::default()
        }
    }

    fn scorer() -> QualityScorer {
        QualityScorer::new(QualitySettings::default())
            .unwrap()
            .with_reference_date(reference())
    }

    #[test]
    fn complete_record_is_valid() {
        let text = "t".repeat(300);
        let entities = full_entities();
        let meta = full_metadata();
        let ext = extraction(QualityTier::High, None);
        let record = AssembledRecord {
            text: &text,
            extraction: Some(&ext),
            entities: &entities,
            metadata: &meta,
        };
        let report = scorer().score(&record);
        assert_eq!(report.overall_score, 1.0);
        assert_eq!(report.grade, Grade::Excellent);
        assert_eq!(report.validation_status, ValidationStatus::Valid);
        assert!(!report.needs_manual_review);
        assert!(report.recommendations.is_empty());
        assert_eq!(report.dimension_scores.len(), 5);
    }

    #[test]
    fn rescoring_is_byte_identical() {
        let text = "t".repeat(300);
        let entities = full_entities();
        let meta = full_metadata();
        let ext = extraction(QualityTier::Medium, Some(0.9));
        let record = AssembledRecord {
            text: &text,
            extraction: Some(&ext),
            entities: &entities,
            metadata: &meta,
        };
        let s = scorer();
        let a = serde_json::to_vec(&s.score(&record)).unwrap();
        let b = serde_json::to_vec(&s.score(&record)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_citations_penalize_completeness_and_recommend() {
        let text = "t".repeat(300);
        let mut entities = full_entities();
        entities.remove(&EntityType::Citation);
        let meta = DocumentMetadata {
            total_citations: 0,
            ..full_metadata()
        };
        let ext = extraction(QualityTier::High, None);
        let record = AssembledRecord {
            text: &text,
            extraction: Some(&ext),
            entities: &entities,
            metadata: &meta,
        };
        let report = scorer().score(&record);
        assert!((report.score(QualityDimension::Completeness) - 0.70).abs() < 1e-9);
        assert_eq!(report.score(QualityDimension::CitationQuality), 0.0);
        // 0.25*0.7 + 0.2*0 + 0.2*1 + 0.2*1 + 0.15*1
        assert!((report.overall_score - 0.725).abs() < 1e-9);
        assert_eq!(report.validation_status, ValidationStatus::NeedsReview);
        assert!(report.needs_manual_review);
        assert!(report.recommendations[0].contains("no citations were extracted"));
        assert!(report.recommendations[1].starts_with("Citation quality"));
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn low_ocr_confidence_alone_triggers_review() {
        let text = "t".repeat(300);
        let entities = full_entities();
        let meta = full_metadata();
        let ext = extraction(QualityTier::High, Some(0.78));
        let record = AssembledRecord {
            text: &text,
            extraction: Some(&ext),
            entities: &entities,
            metadata: &meta,
        };
        let report = scorer().score(&record);
        // text quality 0.89 keeps the overall high
        assert!(report.overall_score >= 0.75);
        assert_eq!(report.validation_status, ValidationStatus::Valid);
        assert!(report.needs_manual_review);
        assert_eq!(report.review_reasons.len(), 1);
        assert!(report.review_reasons[0].contains("OCR confidence"));
    }

    #[test]
    fn missing_title_alone_triggers_review() {
        let text = "t".repeat(300);
        let entities = full_entities();
        let meta = DocumentMetadata {
            title: None,
            ..full_metadata()
        };
        let ext = extraction(QualityTier::High, None);
        let record = AssembledRecord {
            text: &text,
            extraction: Some(&ext),
            entities: &entities,
            metadata: &meta,
        };
        let report = scorer().score(&record);
        assert!(report.needs_manual_review);
        assert!(report.review_reasons.iter().any(|r| r == "title is missing"));
    }

    #[test]
    fn strict_mode_raises_thresholds() {
        let lenient = scorer();
        let strict = QualityScorer::new(QualitySettings {
            strict: true,
            ..QualitySettings::default()
        })
        .unwrap();
        assert_eq!(lenient.status_for(0.80), ValidationStatus::Valid);
        assert_eq!(strict.status_for(0.80), ValidationStatus::NeedsReview);
        assert_eq!(lenient.status_for(0.55), ValidationStatus::NeedsReview);
        assert_eq!(strict.status_for(0.55), ValidationStatus::Invalid);
        assert_eq!(strict.status_for(0.85), ValidationStatus::Valid);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut settings = QualitySettings::default();
        settings.weights.completeness += 0.2;
        let err = QualityScorer::new(settings).err().expect("unbalanced weights rejected");
        assert!(matches!(err, ConfigError::InvalidWeights { .. }), "{err}");

        let mut settings = QualitySettings::default();
        settings.weights.consistency = -0.1;
        settings.weights.completeness += 0.1;
        assert!(QualityScorer::new(settings).is_err());
    }

    #[test]
    fn empty_record_stays_in_range() {
        let text = "";
        let entities = BTreeMap::new();
        let meta = DocumentMetadata::default();
        let record = AssembledRecord {
            text,
            extraction: None,
            entities: &entities,
            metadata: &meta,
        };
        let report = scorer().score(&record);
        assert!((0.0..=1.0).contains(&report.overall_score));
        assert_eq!(report.validation_status, ValidationStatus::Invalid);
        assert!(report.dimension_scores.values().all(|s| (0.0..=1.0).contains(s)));
    }
}
