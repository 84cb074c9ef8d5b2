//! Document processing orchestrator.
//!
//! Drives one document through
//! validation → extraction → normalization → entity passes → scoring
//! and assembles the `PipelineRecord`. Stage failures either abort the
//! document or degrade to an empty contribution, depending on
//! `pipeline.skip_on_error`. Validation and extraction are always critical.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use futures_util::stream::{self, FuturesUnordered, StreamExt};
use uuid::Uuid;

use super::entities::{default_passes, Entity, EntityPass, EntityType, PatternCache, PatternProvider};
use super::extraction::{
    content_hash, normalize_text, AttemptOutcome, EngineFallbackExtractor, EngineFallbackResult,
    ExtractionAttempt, FallbackError,
};
use super::metadata::{assemble_metadata, DocumentMetadata};
use super::quality::{AssembledRecord, QualityReport, QualityScorer, ValidationStatus};
use super::record::{
    stages, ErrorCategory, PipelineRecord, RecordStatus, StageError, StageLogEntry, StageStatus,
};
use super::sink::{EventSink, PersistenceLayer, ProgressCallback, ProgressError, StageEvent, TracingEventSink};
use crate::config::{ConfigError, Settings};
use crate::resilience::{CancelToken, CircuitBreaker, Interrupt};

/// Progress milestones, in percent.
pub mod milestones {
    pub const VALIDATED: u8 = 10;
    pub const EXTRACTED: u8 = 40;
    pub const NORMALIZED: u8 = 50;
    /// Entity passes share the range between `NORMALIZED` and this.
    pub const ENTITIES_DONE: u8 = 90;
    pub const SCORED: u8 = 95;
    pub const COMPLETE: u8 = 100;
}

/// Longest caller-supplied document id accepted.
const MAX_DOCUMENT_ID_LEN: usize = 128;

/// Stage name for an interrupted entity stage as a whole.
const ENTITIES_STAGE: &str = "entities";

/// Terminal progress stages.
const COMPLETE_STAGE: &str = "complete";
const FAILED_STAGE: &str = "failed";

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn interrupt_category(interrupt: Interrupt) -> ErrorCategory {
    match interrupt {
        Interrupt::DeadlineExceeded => ErrorCategory::Timeout,
        Interrupt::Cancelled => ErrorCategory::Cancelled,
    }
}

fn pass_stage(kind: EntityType) -> String {
    format!("{}{}", stages::ENTITY_PREFIX, kind.as_str())
}

/// Document id derived from the content hash when the caller gives none.
pub fn derive_document_id(content_hash: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, content_hash.as_bytes()).to_string()
}

fn validate_document_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("document id is empty".into());
    }
    if id.len() > MAX_DOCUMENT_ID_LEN {
        return Err(format!("document id exceeds {MAX_DOCUMENT_ID_LEN} bytes"));
    }
    if id.starts_with('.')
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!("document id '{id}' contains unsupported characters"));
    }
    Ok(())
}

fn engine_entry(attempt: &ExtractionAttempt, interrupt: Option<Interrupt>) -> StageLogEntry {
    let category = match attempt.outcome {
        AttemptOutcome::CircuitOpen => Some(ErrorCategory::CircuitOpen),
        AttemptOutcome::Interrupted => Some(interrupt.map_or(ErrorCategory::Timeout, interrupt_category)),
        _ => None,
    };
    StageLogEntry {
        stage: format!("{}{}", stages::ENGINE_PREFIX, attempt.engine),
        status: if attempt.succeeded {
            StageStatus::Success
        } else {
            StageStatus::Failed
        },
        duration_ms: attempt.duration_ms,
        error: attempt.error.clone(),
        category,
    }
}

// ---------------------------------------------------------------------------
// Batch input
// ---------------------------------------------------------------------------

/// One document of a batch.
#[derive(Debug, Clone)]
pub struct BatchDocument {
    pub bytes: Arc<[u8]>,
    pub document_id: Option<String>,
    /// Why the input could not be loaded. Such documents fail validation
    /// without reaching extraction.
    pub load_error: Option<String>,
}

impl BatchDocument {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            document_id: None,
            load_error: None,
        }
    }

    /// Placeholder for an input that could not be read. `source` (a path or
    /// URL) seeds the document id.
    pub fn unreadable(source: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            bytes: Arc::from(Vec::<u8>::new()),
            document_id: Some(derive_document_id(source)),
            load_error: Some(format!("failed to read {source}: {reason}")),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Per-document state
// ---------------------------------------------------------------------------

/// Mutable state of one document while it moves through the stages.
struct DocumentRun<'a> {
    events: &'a dyn EventSink,
    document_id: String,
    content_hash: String,
    started_at: chrono::DateTime<Utc>,
    start: Instant,
    extraction: Option<EngineFallbackResult>,
    text: String,
    entities: BTreeMap<EntityType, Vec<Entity>>,
    metadata: Option<DocumentMetadata>,
    quality: Option<QualityReport>,
    log: Vec<StageLogEntry>,
    failure: Option<StageError>,
}

impl<'a> DocumentRun<'a> {
    fn new(events: &'a dyn EventSink, document_id: String, content_hash: String) -> Self {
        Self {
            events,
            document_id,
            content_hash,
            started_at: Utc::now(),
            start: Instant::now(),
            extraction: None,
            text: String::new(),
            entities: BTreeMap::new(),
            metadata: None,
            quality: None,
            log: Vec::new(),
            failure: None,
        }
    }

    fn push(&mut self, entry: StageLogEntry) {
        self.events.emit(&StageEvent {
            stage: entry.stage.clone(),
            document_id: self.document_id.clone(),
            status: entry.status,
            duration_ms: entry.duration_ms,
            error: entry.error.clone(),
        });
        self.log.push(entry);
    }

    fn has_entry(&self, stage: &str) -> bool {
        self.log.iter().any(|e| e.stage == stage)
    }

    fn fail(&mut self, error: StageError, stage_order: &[String]) {
        for stage in stage_order {
            if !self.has_entry(stage) {
                self.push(StageLogEntry::skipped(stage));
            }
        }
        self.failure = Some(error);
    }

    fn status(&self) -> RecordStatus {
        if self.failure.is_some() {
            return RecordStatus::Failed;
        }
        let degraded = self.log.iter().any(|e| e.status == StageStatus::Degraded);
        let valid = self
            .quality
            .as_ref()
            .is_some_and(|q| q.validation_status == ValidationStatus::Valid);
        if degraded || !valid {
            RecordStatus::Partial
        } else {
            RecordStatus::Success
        }
    }

    fn finish(self) -> PipelineRecord {
        let status = self.status();
        match &self.failure {
            Some(failure) => tracing::warn!(
                document_id = %self.document_id,
                stage = %failure.stage,
                category = %failure.category,
                error = %failure.message,
                duration_ms = elapsed_ms(self.start),
                "Document processing failed"
            ),
            None => tracing::info!(
                document_id = %self.document_id,
                status = status.as_str(),
                overall_score = self.quality.as_ref().map(|q| q.overall_score),
                duration_ms = elapsed_ms(self.start),
                "Document processed"
            ),
        }

        PipelineRecord {
            document_id: self.document_id,
            status,
            content_hash: self.content_hash,
            extraction: self.extraction,
            text: self.text,
            entities: self.entities,
            metadata: self.metadata,
            quality: self.quality,
            execution_log: self.log,
            failure: self.failure,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct PipelineOrchestrator {
    settings: Settings,
    extractor: EngineFallbackExtractor,
    breaker: Arc<CircuitBreaker>,
    patterns: Arc<PatternCache>,
    passes: Vec<Arc<dyn EntityPass>>,
    scorer: QualityScorer,
    events: Arc<dyn EventSink>,
    persistence: Option<Arc<dyn PersistenceLayer>>,
    progress: Option<ProgressCallback>,
}

impl PipelineOrchestrator {
    /// Built-in engines, built-in pattern sets, tracing event sink.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let breaker = Arc::new(CircuitBreaker::new(settings.retry.circuit_config()));
        let extractor = EngineFallbackExtractor::from_settings(&settings, Arc::clone(&breaker))?;
        let scorer = QualityScorer::new(settings.quality.clone())?;

        tracing::info!(
            engines = ?extractor.engine_names(),
            ocr = extractor.ocr_enabled(),
            skip_on_error = settings.pipeline.skip_on_error,
            strict = settings.quality.strict,
            "Pipeline orchestrator ready"
        );

        Ok(Self {
            settings,
            extractor,
            breaker,
            patterns: Arc::new(PatternCache::builtin()),
            passes: default_passes(),
            scorer,
            events: Arc::new(TracingEventSink),
            persistence: None,
            progress: None,
        })
    }

    /// Replace the extraction chain. The extractor should share
    /// [`Self::breaker`] so circuit state is visible across documents.
    pub fn with_extractor(mut self, extractor: EngineFallbackExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Load rule sets from `provider` through a fresh cache.
    pub fn with_pattern_provider(mut self, provider: Arc<dyn PatternProvider>) -> Self {
        self.patterns = Arc::new(PatternCache::new(provider));
        self
    }

    pub fn with_passes(mut self, passes: Vec<Arc<dyn EntityPass>>) -> Self {
        self.passes = passes;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceLayer>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, u8) -> Result<(), ProgressError> + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Pin "today" for the scorer's consistency checks.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.scorer = self.scorer.with_reference_date(date);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn pattern_cache(&self) -> &PatternCache {
        &self.patterns
    }

    /// Process one document. Never panics on bad input; every failure is
    /// reported through the returned record. `timeout` defaults to
    /// `pipeline.document_timeout_ms`.
    pub async fn process_document(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        document_id: Option<String>,
        timeout: Option<Duration>,
    ) -> PipelineRecord {
        self.process_document_with_cancel(bytes, document_id, timeout, &CancelToken::never())
            .await
    }

    /// As [`Self::process_document`], also stopping when `cancel` fires.
    pub async fn process_document_with_cancel(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        document_id: Option<String>,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> PipelineRecord {
        let bytes = bytes.into();
        let timeout = timeout.unwrap_or_else(|| self.settings.pipeline.document_timeout());
        let cancel = cancel.with_timeout(timeout);

        let hash = content_hash(&bytes);
        let explicit_id = document_id.clone();
        let mut run = DocumentRun::new(
            self.events.as_ref(),
            document_id.unwrap_or_else(|| derive_document_id(&hash)),
            hash,
        );

        tracing::info!(
            document_id = %run.document_id,
            size = bytes.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Processing document"
        );

        if let Err(error) = self
            .drive(&mut run, bytes, explicit_id.as_deref(), &cancel)
            .await
        {
            run.fail(error, &self.stage_order());
        }

        self.conclude(run)
    }

    /// Failed record for an input that never produced bytes. Validation
    /// fails with `reason`; every other stage is skipped.
    pub fn reject_input(&self, document_id: Option<String>, reason: impl Into<String>) -> PipelineRecord {
        let mut run = DocumentRun::new(
            self.events.as_ref(),
            document_id.unwrap_or_else(|| derive_document_id(&content_hash(&[]))),
            String::new(),
        );
        let error = StageError::new(stages::VALIDATION, ErrorCategory::Validation, reason);
        tracing::warn!(document_id = %run.document_id, error = %error.message, "Input rejected");
        run.push(StageLogEntry::from_error(StageStatus::Failed, &error, 0));
        run.fail(error, &self.stage_order());
        self.conclude(run)
    }

    fn conclude(&self, run: DocumentRun<'_>) -> PipelineRecord {
        let record = run.finish();
        if record.is_failed() {
            self.report_progress(FAILED_STAGE, milestones::COMPLETE);
        } else {
            self.report_progress(COMPLETE_STAGE, milestones::COMPLETE);
        }
        self.persist(&record);
        record
    }

    /// Process documents with at most `concurrency` in flight (0 uses
    /// `pipeline.batch_concurrency`). Output order matches input order.
    pub async fn process_batch(
        &self,
        documents: Vec<BatchDocument>,
        concurrency: usize,
    ) -> Vec<PipelineRecord> {
        let limit = if concurrency == 0 {
            self.settings.pipeline.batch_concurrency
        } else {
            concurrency
        };
        tracing::info!(documents = documents.len(), concurrency = limit, "Processing batch");

        stream::iter(documents)
            .map(|doc| async move {
                match doc.load_error {
                    Some(reason) => self.reject_input(doc.document_id, reason),
                    None => self.process_document(doc.bytes, doc.document_id, None).await,
                }
            })
            .buffered(limit.max(1))
            .collect()
            .await
    }

    // ── stages ──────────────────────────────────────────────

    /// Every stage name a full run logs, in order.
    fn stage_order(&self) -> Vec<String> {
        let mut order = vec![
            stages::VALIDATION.to_string(),
            stages::EXTRACTION.to_string(),
            stages::NORMALIZATION.to_string(),
        ];
        order.extend(self.passes.iter().map(|p| pass_stage(p.entity_type())));
        order.push(stages::SCORING.to_string());
        order
    }

    async fn drive(
        &self,
        run: &mut DocumentRun<'_>,
        bytes: Arc<[u8]>,
        explicit_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<(), StageError> {
        self.validate(run, &bytes, explicit_id)?;
        self.report_progress(stages::VALIDATION, milestones::VALIDATED);

        self.extract(run, bytes, cancel).await?;
        self.report_progress(stages::EXTRACTION, milestones::EXTRACTED);

        self.checkpoint(run, stages::NORMALIZATION, cancel)?;
        self.normalize(run)?;
        self.report_progress(stages::NORMALIZATION, milestones::NORMALIZED);

        self.extract_entities(run, cancel).await?;

        self.checkpoint(run, stages::SCORING, cancel)?;
        self.score(run);
        self.report_progress(stages::SCORING, milestones::SCORED);
        Ok(())
    }

    /// Fail `stage` if the deadline passed or the caller cancelled.
    fn checkpoint(
        &self,
        run: &mut DocumentRun<'_>,
        stage: &str,
        cancel: &CancelToken,
    ) -> Result<(), StageError> {
        match cancel.interruption() {
            None => Ok(()),
            Some(interrupt) => {
                let error = StageError::new(stage, interrupt_category(interrupt), interrupt.to_string());
                run.push(StageLogEntry::from_error(StageStatus::Failed, &error, 0));
                Err(error)
            }
        }
    }

    /// Lenient mode logs the failure as degraded and carries on; otherwise
    /// the document fails.
    fn degrade_or_fail(
        &self,
        run: &mut DocumentRun<'_>,
        error: StageError,
        duration_ms: u64,
    ) -> Result<(), StageError> {
        if self.settings.pipeline.skip_on_error {
            run.push(StageLogEntry::from_error(StageStatus::Degraded, &error, duration_ms));
            Ok(())
        } else {
            run.push(StageLogEntry::from_error(StageStatus::Failed, &error, duration_ms));
            Err(error)
        }
    }

    fn validate(
        &self,
        run: &mut DocumentRun<'_>,
        bytes: &[u8],
        explicit_id: Option<&str>,
    ) -> Result<(), StageError> {
        let start = Instant::now();
        let limit = self.settings.pipeline.max_document_bytes;

        let problem = if bytes.is_empty() {
            Some("document is empty".to_string())
        } else if bytes.len() > limit {
            Some(format!("document is {} bytes, limit is {limit}", bytes.len()))
        } else {
            explicit_id.and_then(|id| validate_document_id(id).err())
        };

        match problem {
            None => {
                run.push(StageLogEntry::success(stages::VALIDATION, elapsed_ms(start)));
                Ok(())
            }
            Some(reason) => {
                let error = StageError::new(stages::VALIDATION, ErrorCategory::Validation, reason);
                run.push(StageLogEntry::from_error(StageStatus::Failed, &error, elapsed_ms(start)));
                Err(error)
            }
        }
    }

    async fn extract(
        &self,
        run: &mut DocumentRun<'_>,
        bytes: Arc<[u8]>,
        cancel: &CancelToken,
    ) -> Result<(), StageError> {
        let start = Instant::now();
        let err = match self.extractor.extract(bytes, cancel).await {
            Ok(result) => {
                for attempt in &result.attempts {
                    run.push(engine_entry(attempt, None));
                }
                run.push(StageLogEntry::success(stages::EXTRACTION, elapsed_ms(start)));
                run.extraction = Some(result);
                return Ok(());
            }
            Err(err) => err,
        };

        let (category, interrupt) = match &err {
            FallbackError::Interrupted { interrupt, .. } => (interrupt_category(*interrupt), Some(*interrupt)),
            e if e.all_circuits_open() => (ErrorCategory::CircuitOpen, None),
            FallbackError::Exhausted { .. } => (ErrorCategory::ExtractionExhausted, None),
        };
        let error = StageError::new(stages::EXTRACTION, category, err.to_string());
        for attempt in err.attempts() {
            run.push(engine_entry(attempt, interrupt));
        }
        run.push(StageLogEntry::from_error(StageStatus::Failed, &error, elapsed_ms(start)));
        Err(error)
    }

    fn normalize(&self, run: &mut DocumentRun<'_>) -> Result<(), StageError> {
        let start = Instant::now();
        let raw = run
            .extraction
            .as_ref()
            .map(|e| e.final_text.clone())
            .unwrap_or_default();

        let normalized = normalize_text(&raw);
        if normalized.trim().is_empty() {
            // Degraded runs keep the raw text.
            run.text = raw;
            let error = StageError::new(
                stages::NORMALIZATION,
                ErrorCategory::Internal,
                "normalization removed all text",
            );
            return self.degrade_or_fail(run, error, elapsed_ms(start));
        }

        tracing::debug!(
            document_id = %run.document_id,
            raw_chars = raw.chars().count(),
            normalized_chars = normalized.chars().count(),
            "Text normalized"
        );
        run.text = normalized;
        run.push(StageLogEntry::success(stages::NORMALIZATION, elapsed_ms(start)));
        Ok(())
    }

    /// Run every pass concurrently on the blocking pool. Each pass writes its
    /// own slot; the log is written in pass order once all have finished.
    async fn extract_entities(
        &self,
        run: &mut DocumentRun<'_>,
        cancel: &CancelToken,
    ) -> Result<(), StageError> {
        let start = Instant::now();
        let text: Arc<str> = Arc::from(run.text.as_str());
        let total = self.passes.len();

        let mut pending: FuturesUnordered<_> = self
            .passes
            .iter()
            .enumerate()
            .map(|(index, pass)| {
                let pass = Arc::clone(pass);
                let text = Arc::clone(&text);
                let patterns = Arc::clone(&self.patterns);
                async move {
                    let started = Instant::now();
                    let result = tokio::task::spawn_blocking(move || pass.run(&text, &patterns)).await;
                    (index, result, elapsed_ms(started))
                }
            })
            .collect();

        let collect = async {
            let mut slots: Vec<Option<(Result<Vec<Entity>, StageError>, u64)>> =
                (0..total).map(|_| None).collect();
            let mut done = 0usize;
            while let Some((index, result, duration_ms)) = pending.next().await {
                let stage = pass_stage(self.passes[index].entity_type());
                let result = match result {
                    Ok(Ok(entities)) => Ok(entities),
                    Ok(Err(pattern)) => Err(StageError::new(
                        &stage,
                        ErrorCategory::PatternConfig,
                        pattern.to_string(),
                    )),
                    Err(join) => Err(StageError::new(
                        &stage,
                        ErrorCategory::Internal,
                        format!("entity pass crashed: {join}"),
                    )),
                };
                slots[index] = Some((result, duration_ms));

                done += 1;
                let span = u64::from(milestones::ENTITIES_DONE - milestones::NORMALIZED);
                let percent = u64::from(milestones::NORMALIZED) + span * done as u64 / total as u64;
                self.report_progress(&stage, percent as u8);
            }
            slots
        };

        let slots = match cancel.run(collect).await {
            Ok(slots) => slots,
            Err(interrupt) => {
                let error = StageError::new(ENTITIES_STAGE, interrupt_category(interrupt), interrupt.to_string());
                run.push(StageLogEntry::from_error(StageStatus::Failed, &error, elapsed_ms(start)));
                return Err(error);
            }
        };

        let mut first_failure = None;
        for (pass, slot) in self.passes.iter().zip(slots) {
            let kind = pass.entity_type();
            let Some((result, duration_ms)) = slot else {
                continue;
            };
            match result {
                Ok(entities) => {
                    tracing::debug!(
                        document_id = %run.document_id,
                        entity_type = kind.as_str(),
                        count = entities.len(),
                        "Entity pass complete"
                    );
                    run.entities.insert(kind, entities);
                    run.push(StageLogEntry::success(&pass_stage(kind), duration_ms));
                }
                Err(error) => {
                    run.entities.insert(kind, Vec::new());
                    if let Err(error) = self.degrade_or_fail(run, error, duration_ms) {
                        first_failure.get_or_insert(error);
                    }
                }
            }
        }

        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Assemble metadata and score. Neither step can fail.
    fn score(&self, run: &mut DocumentRun<'_>) {
        let start = Instant::now();
        let page_count = run.extraction.as_ref().map_or(0, |e| e.page_count);
        let metadata = assemble_metadata(&run.text, page_count, &run.entities);

        let report = self.scorer.score(&AssembledRecord {
            text: &run.text,
            extraction: run.extraction.as_ref(),
            entities: &run.entities,
            metadata: &metadata,
        });

        tracing::info!(
            document_id = %run.document_id,
            overall_score = report.overall_score,
            validation_status = report.validation_status.as_str(),
            needs_manual_review = report.needs_manual_review,
            "Quality assessment complete"
        );

        run.metadata = Some(metadata);
        run.quality = Some(report);
        run.push(StageLogEntry::success(stages::SCORING, elapsed_ms(start)));
    }

    // ── collaborators ───────────────────────────────────────

    fn report_progress(&self, stage: &str, percent: u8) {
        if let Some(callback) = &self.progress {
            if let Err(e) = callback(stage, percent) {
                tracing::warn!(stage, percent, error = %e, "Progress callback failed");
            }
        }
    }

    fn persist(&self, record: &PipelineRecord) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.persist(record) {
            tracing::warn!(
                document_id = %record.document_id,
                error = %e,
                "Failed to persist record"
            );
        }
    }
}
