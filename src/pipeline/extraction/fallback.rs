//! Multi-engine text extraction with an OCR escape hatch.
//!
//! Order of play for one document:
//! 1. Sample the leading pages with the first engine that accepts the input;
//!    too few words per page means the document is probably a scan. Plain
//!    UTF-8 text is never sampled and never sent to OCR.
//! 2. Suspected scan + OCR enabled: OCR goes first.
//! 3. Otherwise walk the engine chain in priority order, each engine under
//!    the retry executor. Permanent errors move on to the next engine.
//! 4. First output with at least `min_text_length` visible characters wins.
//! 5. Chain exhausted: OCR as a last resort, unless it already ran.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::engines::{builtin_engine, is_plain_text};
use super::ocr::TesseractCliEngine;
use super::pages::{count_pages, split_pages};
use super::quality::assess_quality_tier;
use super::scan::{assess_sample, ScanAssessment};
use super::types::{
    AttemptOutcome, EngineError, EngineFallbackResult, EngineOutput, ExtractionAttempt,
    FallbackError, OcrEngine, TextEngine,
};
use crate::config::{ConfigError, Settings};
use crate::resilience::{
    CancelToken, CircuitBreaker, CircuitState, Interrupt, RetryError, RetryExecutor, RetryPolicy,
};

/// SHA-256 of the raw document, base64-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Run a blocking engine call off the async runtime under a timeout.
/// A call that outlives its timeout keeps running on the blocking pool
/// but its result is discarded.
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(EngineError::Internal(format!("engine task failed: {join}"))),
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}

/// Output that passed the minimum-length gate.
struct Accepted {
    text: String,
    page_count: Option<usize>,
    ocr_confidence: Option<f64>,
}

/// One engine try as seen by the chain walker.
struct Tried {
    attempt: ExtractionAttempt,
    accepted: Option<Accepted>,
    interrupt: Option<Interrupt>,
}

pub struct EngineFallbackExtractor {
    engines: Vec<Arc<dyn TextEngine>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    executor: RetryExecutor,
    engine_policy: RetryPolicy,
    ocr_policy: RetryPolicy,
    engine_timeout: Duration,
    ocr_timeout: Duration,
    min_text_length: usize,
    sample_pages: usize,
    scanned_words_per_page: usize,
}

impl EngineFallbackExtractor {
    /// Engines in priority order, no OCR, default tuning.
    pub fn new(engines: Vec<Arc<dyn TextEngine>>, executor: RetryExecutor) -> Self {
        let defaults = Settings::default();
        Self {
            engines,
            ocr: None,
            executor,
            engine_policy: defaults.retry.engine.to_policy(),
            ocr_policy: defaults.retry.ocr.to_policy(),
            engine_timeout: defaults.extraction.engine_timeout(),
            ocr_timeout: defaults.extraction.ocr_timeout(),
            min_text_length: defaults.extraction.min_text_length,
            sample_pages: defaults.extraction.scan_sample_pages,
            scanned_words_per_page: defaults.extraction.scanned_words_per_page,
        }
    }

    /// Built-in engines and Tesseract OCR as configured.
    pub fn from_settings(
        settings: &Settings,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ConfigError> {
        let ext = &settings.extraction;
        let engines = ext
            .engines
            .iter()
            .map(|name| {
                builtin_engine(name).ok_or_else(|| ConfigError::Invalid {
                    field: "extraction.engines",
                    reason: format!("unknown engine '{name}'"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut extractor = Self::new(engines, RetryExecutor::new(breaker))
            .with_policies(settings.retry.engine.to_policy(), settings.retry.ocr.to_policy())
            .with_timeouts(ext.engine_timeout(), ext.ocr_timeout())
            .with_min_text_length(ext.min_text_length)
            .with_scan_heuristic(ext.scan_sample_pages, ext.scanned_words_per_page);

        if ext.ocr_enabled {
            let tesseract =
                TesseractCliEngine::new(&ext.tesseract_path).with_languages(&ext.ocr_languages);
            extractor = extractor.with_ocr(Arc::new(tesseract));
        }
        Ok(extractor)
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn without_ocr(mut self) -> Self {
        self.ocr = None;
        self
    }

    pub fn with_policies(mut self, engine: RetryPolicy, ocr: RetryPolicy) -> Self {
        self.engine_policy = engine;
        self.ocr_policy = ocr;
        self
    }

    pub fn with_timeouts(mut self, engine: Duration, ocr: Duration) -> Self {
        self.engine_timeout = engine;
        self.ocr_timeout = ocr;
        self
    }

    pub fn with_min_text_length(mut self, min: usize) -> Self {
        self.min_text_length = min.max(1);
        self
    }

    pub fn with_scan_heuristic(mut self, sample_pages: usize, words_per_page: usize) -> Self {
        self.sample_pages = sample_pages.max(1);
        self.scanned_words_per_page = words_per_page;
        self
    }

    pub fn ocr_enabled(&self) -> bool {
        self.ocr.is_some()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    /// Extract text from one document. Fails only when every engine,
    /// including OCR when enabled, has failed, or when `cancel` fires.
    pub async fn extract(
        &self,
        bytes: Arc<[u8]>,
        cancel: &CancelToken,
    ) -> Result<EngineFallbackResult, FallbackError> {
        let content_hash = content_hash(&bytes);
        let mut attempts = Vec::new();

        // Plain text has no page images: OCR has nothing to read.
        let ocr = self.ocr.as_ref().filter(|_| !is_plain_text(&bytes));
        if self.ocr.is_some() && ocr.is_none() {
            tracing::debug!("Plain text input, OCR disabled for this document");
        }

        let scan = match ocr {
            Some(_) => self.sample_scan(&bytes, cancel).await,
            None => None,
        };
        let sample_words_per_page = scan.map(|s| s.words_per_page);

        let mut ocr_tried = false;
        if let (Some(ocr), Some(assessment)) = (ocr, scan) {
            if assessment.is_scanned {
                tracing::info!(
                    words_per_page = assessment.words_per_page,
                    pages_sampled = assessment.pages_sampled,
                    "Scanned document suspected, trying OCR first"
                );
                ocr_tried = true;
                let tried = self.try_ocr(ocr, &bytes, cancel).await;
                if let Some(result) = self.settle(
                    tried,
                    &mut attempts,
                    &content_hash,
                    sample_words_per_page,
                )? {
                    return Ok(result);
                }
            }
        }

        for engine in &self.engines {
            let tried = self.try_engine(engine, &bytes, cancel).await;
            if let Some(result) = self.settle(
                tried,
                &mut attempts,
                &content_hash,
                sample_words_per_page,
            )? {
                return Ok(result);
            }
        }

        if let (Some(ocr), false) = (ocr, ocr_tried) {
            tracing::info!(attempts = attempts.len(), "Engine chain exhausted, falling back to OCR");
            let tried = self.try_ocr(ocr, &bytes, cancel).await;
            if let Some(result) = self.settle(
                tried,
                &mut attempts,
                &content_hash,
                sample_words_per_page,
            )? {
                return Ok(result);
            }
        }

        tracing::warn!(attempts = attempts.len(), "All extraction engines failed");
        Err(FallbackError::Exhausted { attempts })
    }

    /// Record an attempt; build the result if it was accepted, bail out if
    /// it was interrupted.
    fn settle(
        &self,
        tried: Tried,
        attempts: &mut Vec<ExtractionAttempt>,
        content_hash: &str,
        sample_words_per_page: Option<f64>,
    ) -> Result<Option<EngineFallbackResult>, FallbackError> {
        let engine = tried.attempt.engine.clone();
        attempts.push(tried.attempt);

        if let Some(interrupt) = tried.interrupt {
            return Err(FallbackError::Interrupted {
                interrupt,
                attempts: std::mem::take(attempts),
            });
        }

        let Some(accepted) = tried.accepted else {
            return Ok(None);
        };

        let page_count = count_pages(&accepted.text, accepted.page_count);
        let pages = split_pages(&accepted.text, Some(page_count));
        let quality_tier = assess_quality_tier(&accepted.text);
        let is_scanned = accepted.ocr_confidence.is_some();

        tracing::info!(
            engine = %engine,
            is_scanned,
            pages = page_count,
            quality_tier = quality_tier.as_str(),
            text_length = accepted.text.len(),
            attempts = attempts.len(),
            "Text extraction complete"
        );

        Ok(Some(EngineFallbackResult {
            final_text: accepted.text,
            engine_used: Some(engine),
            is_scanned,
            ocr_confidence: accepted.ocr_confidence,
            quality_tier,
            content_hash: content_hash.to_string(),
            page_count,
            pages,
            sample_words_per_page,
            attempts: std::mem::take(attempts),
        }))
    }

    async fn sample_scan(&self, bytes: &Arc<[u8]>, cancel: &CancelToken) -> Option<ScanAssessment> {
        for engine in &self.engines {
            if self.executor.breaker().state(engine.name()) == CircuitState::Open {
                continue;
            }
            let e = Arc::clone(engine);
            let b = Arc::clone(bytes);
            let pages = self.sample_pages;
            let call = run_blocking(self.engine_timeout, move || e.extract(&b, Some(pages)));
            match cancel.run(call).await {
                Ok(Ok(sample)) => {
                    return Some(assess_sample(
                        &sample,
                        self.sample_pages,
                        self.scanned_words_per_page,
                    ))
                }
                Ok(Err(err)) => {
                    tracing::debug!(engine = engine.name(), error = %err, "Scan sample failed, trying next engine");
                }
                Err(_) => return None,
            }
        }
        None
    }

    async fn try_engine(
        &self,
        engine: &Arc<dyn TextEngine>,
        bytes: &Arc<[u8]>,
        cancel: &CancelToken,
    ) -> Tried {
        let name = engine.name().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let timeout = self.engine_timeout;
        let mut calls = 0u32;

        let result = self
            .executor
            .execute(
                &name,
                &self.engine_policy,
                |_| {
                    calls += 1;
                    let engine = Arc::clone(engine);
                    let bytes = Arc::clone(bytes);
                    run_blocking(timeout, move || engine.extract(&bytes, None))
                },
                EngineError::class,
                cancel,
            )
            .await
            .map(|output: EngineOutput| (output.text, output.page_count, None));

        self.conclude(name, started_at, start, calls, result)
    }

    async fn try_ocr(
        &self,
        ocr: &Arc<dyn OcrEngine>,
        bytes: &Arc<[u8]>,
        cancel: &CancelToken,
    ) -> Tried {
        let name = ocr.name().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let timeout = self.ocr_timeout;
        let mut calls = 0u32;

        let result = self
            .executor
            .execute(
                &name,
                &self.ocr_policy,
                |_| {
                    calls += 1;
                    let ocr = Arc::clone(ocr);
                    let bytes = Arc::clone(bytes);
                    run_blocking(timeout, move || ocr.recognize(&bytes))
                },
                EngineError::class,
                cancel,
            )
            .await
            .map(|output| {
                (
                    output.text,
                    output.page_count,
                    Some(output.confidence.clamp(0.0, 1.0)),
                )
            });

        self.conclude(name, started_at, start, calls, result)
    }

    /// Turn an executor result into an attempt record, applying the
    /// minimum-length gate to successful output.
    fn conclude(
        &self,
        engine: String,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
        calls: u32,
        result: Result<(String, Option<usize>, Option<f64>), RetryError<EngineError>>,
    ) -> Tried {
        let mut interrupt = None;
        let (outcome, text, page_count, error, accepted) = match result {
            Ok((text, page_count, ocr_confidence)) => {
                let visible = text.chars().filter(|c| !c.is_whitespace()).count();
                if visible >= self.min_text_length {
                    let pages = count_pages(&text, page_count);
                    let accepted = Accepted {
                        text: text.clone(),
                        page_count,
                        ocr_confidence,
                    };
                    (AttemptOutcome::Accepted, text, pages, None, Some(accepted))
                } else {
                    let error = format!(
                        "only {visible} characters extracted (minimum {})",
                        self.min_text_length
                    );
                    let pages = count_pages(&text, page_count);
                    (AttemptOutcome::InsufficientText, text, pages, Some(error), None)
                }
            }
            Err(err) => {
                let outcome = match &err {
                    RetryError::CircuitOpen { .. } => AttemptOutcome::CircuitOpen,
                    RetryError::Permanent { .. } => AttemptOutcome::Permanent,
                    RetryError::Exhausted { .. } => AttemptOutcome::Exhausted,
                    RetryError::Interrupted { interrupt: i, .. } => {
                        interrupt = Some(*i);
                        AttemptOutcome::Interrupted
                    }
                };
                (outcome, String::new(), 0, Some(err.to_string()), None)
            }
        };

        let attempt = ExtractionAttempt {
            engine,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            succeeded: outcome == AttemptOutcome::Accepted,
            outcome,
            extracted_text: text,
            page_count,
            error,
            calls,
        };

        if !attempt.succeeded {
            tracing::warn!(
                engine = %attempt.engine,
                outcome = ?attempt.outcome,
                calls = attempt.calls,
                error = attempt.error.as_deref().unwrap_or(""),
                "Extraction attempt failed"
            );
        }
        Tried {
            attempt,
            accepted,
            interrupt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::engines::Utf8TextEngine;
    use crate::pipeline::extraction::testing::{words, ScriptedEngine, ScriptedOcrEngine};
    use crate::pipeline::extraction::types::QualityTier;
    use crate::resilience::{CancelSource, CircuitBreakerConfig};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            jitter: false,
        }
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 100,
            reopen_after: Duration::from_secs(60),
        })))
    }

    fn extractor(engines: Vec<Arc<dyn TextEngine>>) -> EngineFallbackExtractor {
        EngineFallbackExtractor::new(engines, executor())
            .with_policies(fast_policy(3), fast_policy(2))
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5))
    }

    fn bytes(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    const PROSE: &str = "The appellant was convicted by the Sessions Judge and the High Court \
                         Division affirmed the conviction after hearing the learned counsel.";

    #[tokio::test]
    async fn first_engine_success_is_accepted() {
        let first = Arc::new(ScriptedEngine::succeeding("first", PROSE));
        let second = Arc::new(ScriptedEngine::succeeding("second", PROSE));
        let ex = extractor(vec![first.clone(), second.clone()]);

        let result = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap();
        assert_eq!(result.engine_used.as_deref(), Some("first"));
        assert_eq!(result.final_text, PROSE);
        assert!(!result.is_scanned);
        assert!(result.ocr_confidence.is_none());
        assert_eq!(result.quality_tier, QualityTier::High);
        assert_eq!(result.attempts.len(), 1);
        assert!(result.attempts[0].succeeded);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
        assert_eq!(result.content_hash, content_hash(b"raw"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_on_same_engine() {
        let flaky = Arc::new(
            ScriptedEngine::succeeding("flaky", PROSE).with_script(vec![
                Err(EngineError::Io("reset".into())),
                Err(EngineError::Timeout(Duration::from_secs(1))),
            ]),
        );
        let ex = extractor(vec![flaky.clone()]);

        let result = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap();
        assert_eq!(flaky.calls(), 3);
        assert_eq!(result.attempts[0].calls, 3);
        assert_eq!(result.engine_used.as_deref(), Some("flaky"));
    }

    #[tokio::test]
    async fn permanent_error_falls_through_without_retry() {
        let encrypted = Arc::new(ScriptedEngine::failing("pdf", EngineError::Encrypted));
        let backup = Arc::new(ScriptedEngine::succeeding("backup", PROSE));
        let ex = extractor(vec![encrypted.clone(), backup.clone()]);

        let result = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap();
        assert_eq!(encrypted.calls(), 1);
        assert_eq!(result.engine_used.as_deref(), Some("backup"));
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Permanent);
        assert!(result.attempts[0].error.as_deref().unwrap().contains("encrypted"));
    }

    #[tokio::test]
    async fn short_output_is_rejected_and_next_engine_tried() {
        let short = Arc::new(ScriptedEngine::succeeding("short", "tiny"));
        let full = Arc::new(ScriptedEngine::succeeding("full", PROSE));
        let ex = extractor(vec![short.clone(), full]);

        let result = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap();
        assert_eq!(short.calls(), 1, "insufficient text is not retried");
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::InsufficientText);
        assert_eq!(result.attempts[0].extracted_text, "tiny");
        assert_eq!(result.engine_used.as_deref(), Some("full"));
    }

    #[tokio::test]
    async fn scanned_document_goes_straight_to_ocr() {
        // 40 words per page over two sampled pages.
        let sparse = EngineOutput::new(words(80)).with_pages(2);
        let text_layer = Arc::new(
            ScriptedEngine::with_fallback("text_layer", Ok(sparse.clone())).with_sample(Ok(sparse)),
        );
        let ocr = Arc::new(ScriptedOcrEngine::new(PROSE, 0.91));
        let ex = extractor(vec![text_layer.clone()]).with_ocr(ocr.clone());

        let result = ex.extract(bytes("%PDF-scan"), &CancelToken::never()).await.unwrap();
        assert!(result.is_scanned);
        assert_eq!(result.ocr_confidence, Some(0.91));
        assert_eq!(result.engine_used.as_deref(), Some("scripted_ocr"));
        assert_eq!(result.sample_words_per_page, Some(40.0));
        assert_eq!(text_layer.sample_calls(), 1);
        assert_eq!(text_layer.calls(), 0, "chain skipped once OCR succeeded");
        assert_eq!(ocr.calls(), 1);
    }

    #[tokio::test]
    async fn failed_first_ocr_falls_back_to_chain() {
        let sparse = EngineOutput::new(words(80)).with_pages(2);
        let text_layer = Arc::new(
            ScriptedEngine::with_fallback("text_layer", Ok(sparse.clone())).with_sample(Ok(sparse)),
        );
        let ocr = Arc::new(ScriptedOcrEngine::failing(EngineError::Unavailable(
            "tesseract".into(),
        )));
        let ex = extractor(vec![text_layer.clone()]).with_ocr(ocr.clone());

        let result = ex.extract(bytes("%PDF-scan"), &CancelToken::never()).await.unwrap();
        assert_eq!(result.engine_used.as_deref(), Some("text_layer"));
        assert!(!result.is_scanned);
        assert_eq!(ocr.calls(), 1, "OCR is not retried as a last resort");
        assert_eq!(result.attempts.len(), 2);
    }

    #[tokio::test]
    async fn ocr_is_last_resort_after_chain_exhausts() {
        let dense = EngineOutput::new(words(600)).with_pages(2);
        let broken = Arc::new(
            ScriptedEngine::failing("broken", EngineError::Corrupt("xref".into()))
                .with_sample(Ok(dense)),
        );
        let ocr = Arc::new(ScriptedOcrEngine::new(PROSE, 0.75));
        let ex = extractor(vec![broken]).with_ocr(ocr.clone());

        let result = ex.extract(bytes("%PDF-raw"), &CancelToken::never()).await.unwrap();
        assert!(result.is_scanned);
        assert_eq!(result.ocr_confidence, Some(0.75));
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[1].engine, "scripted_ocr");
    }

    #[tokio::test]
    async fn plain_text_memos_never_reach_ocr() {
        // 12 words on one page: far below the scanned threshold.
        const MEMO: &str = "Hearing adjourned to 3 June 2026 at the request of the appellant.";
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reopen_after: Duration::from_secs(60),
        }));
        let ocr = Arc::new(ScriptedOcrEngine::failing(EngineError::Unsupported(
            "pixReadStream: Unknown format".into(),
        )));
        let ex = EngineFallbackExtractor::new(
            vec![Arc::new(Utf8TextEngine) as Arc<dyn TextEngine>],
            RetryExecutor::new(Arc::clone(&breaker)),
        )
        .with_policies(fast_policy(3), fast_policy(2))
        .with_ocr(ocr.clone());

        for _ in 0..5 {
            let result = ex.extract(bytes(MEMO), &CancelToken::never()).await.unwrap();
            assert_eq!(result.engine_used.as_deref(), Some("utf8_text"));
            assert!(!result.is_scanned);
            assert!(result.sample_words_per_page.is_none());
        }
        // Too short for the length gate, and still no OCR.
        let err = ex.extract(bytes("Noted."), &CancelToken::never()).await.unwrap_err();
        assert_eq!(err.attempts().len(), 1);

        assert_eq!(ocr.calls(), 0);
        assert_eq!(breaker.state("scripted_ocr"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn every_engine_failing_exhausts() {
        let engines: Vec<Arc<ScriptedEngine>> = ["a", "b", "c"]
            .iter()
            .map(|n| Arc::new(ScriptedEngine::failing(n, EngineError::Io("flaky".into()))))
            .collect();
        let ex = extractor(engines.iter().map(|e| e.clone() as Arc<dyn TextEngine>).collect());

        let err = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap_err();
        match &err {
            FallbackError::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::Exhausted));
                assert!(attempts.iter().all(|a| a.calls == 3));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        for e in &engines {
            assert_eq!(e.calls(), 3);
        }
    }

    #[tokio::test]
    async fn success_never_has_empty_text() {
        let blank = Arc::new(ScriptedEngine::succeeding("blank", "   \n\t  "));
        let ex = extractor(vec![blank]).with_min_text_length(1);
        let err = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap_err();
        assert_eq!(err.attempts()[0].outcome, AttemptOutcome::InsufficientText);
    }

    #[tokio::test]
    async fn open_circuit_skips_engine() {
        let ex = extractor(vec![
            Arc::new(ScriptedEngine::succeeding("tripped", PROSE)),
            Arc::new(ScriptedEngine::succeeding("healthy", PROSE)),
        ]);
        for _ in 0..100 {
            ex.breaker().record_failure("tripped");
        }

        let result = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap();
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::CircuitOpen);
        assert_eq!(result.attempts[0].calls, 0);
        assert_eq!(result.engine_used.as_deref(), Some("healthy"));
    }

    #[tokio::test]
    async fn slow_engine_times_out_as_transient() {
        let slow = Arc::new(
            ScriptedEngine::succeeding("slow", PROSE).with_delay(Duration::from_millis(200)),
        );
        let ex = extractor(vec![slow])
            .with_policies(fast_policy(2), fast_policy(1))
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20));

        let err = ex.extract(bytes("raw"), &CancelToken::never()).await.unwrap_err();
        let attempt = &err.attempts()[0];
        assert_eq!(attempt.outcome, AttemptOutcome::Exhausted);
        assert_eq!(attempt.calls, 2);
        assert!(attempt.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_extraction() {
        let failing = Arc::new(ScriptedEngine::failing("flaky", EngineError::Io("reset".into())));
        let slow_policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        };
        let ex = extractor(vec![failing]).with_policies(slow_policy.clone(), slow_policy);
        let source = CancelSource::new();
        let token = source.token();

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            source.cancel();
        });
        let err = ex.extract(bytes("raw"), &token).await.unwrap_err();
        cancel.await.unwrap();

        assert!(matches!(
            err,
            FallbackError::Interrupted {
                interrupt: Interrupt::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash(b"judgment"), content_hash(b"judgment"));
        assert_ne!(content_hash(b"judgment"), content_hash(b"order"));
    }

    #[test]
    fn from_settings_rejects_unknown_engine() {
        let mut settings = Settings::default();
        settings.extraction.engines.push("pdfium".into());
        let err = EngineFallbackExtractor::from_settings(&settings, Arc::default()).err().unwrap();
        assert!(err.to_string().contains("pdfium"));
    }

    #[test]
    fn from_settings_wires_builtin_chain() {
        let ex = EngineFallbackExtractor::from_settings(&Settings::default(), Arc::default()).unwrap();
        assert_eq!(ex.engine_names(), vec!["utf8_text", "pdf_text_layer", "lossy_text"]);
        assert!(ex.ocr_enabled());
    }
}
