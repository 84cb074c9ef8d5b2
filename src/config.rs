use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::quality::QualityWeights;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Application-level constants
pub const APP_NAME: &str = "casemeta";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CASEMETA_CONFIG";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "casemeta=info,warn"
}

/// `<config_dir>/casemeta/config.toml`, or `None` when the platform has no
/// config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Quality weights must sum to 1.0 (got {sum:.4})")]
    InvalidWeights { sum: f64 },

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

/// Top-level runtime settings. Every field has a default, so an empty TOML
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub extraction: ExtractionSettings,
    pub retry: RetrySettings,
    pub quality: QualitySettings,
    pub pipeline: PipelineSettings,
}

/// Engine chain and OCR configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Non-OCR engines in priority order.
    pub engines: Vec<String>,
    pub ocr_enabled: bool,
    /// Accepted text must have at least this many non-whitespace characters.
    pub min_text_length: usize,
    /// Pages extracted for the scanned-document heuristic.
    pub scan_sample_pages: usize,
    /// Below this many words per sampled page a document is treated as scanned.
    pub scanned_words_per_page: usize,
    pub engine_timeout_ms: u64,
    pub ocr_timeout_ms: u64,
    pub tesseract_path: PathBuf,
    pub ocr_languages: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            engines: vec![
                "utf8_text".to_string(),
                "pdf_text_layer".to_string(),
                "lossy_text".to_string(),
            ],
            ocr_enabled: true,
            min_text_length: 50,
            scan_sample_pages: 2,
            scanned_words_per_page: 50,
            engine_timeout_ms: 30_000,
            ocr_timeout_ms: 120_000,
            tesseract_path: PathBuf::from("tesseract"),
            ocr_languages: "eng".to_string(),
        }
    }
}

impl ExtractionSettings {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }
}

/// Retry policy as written in TOML (durations in milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid(field, "max_attempts must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(field, "backoff_multiplier must be >= 1.0"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(field, "base_delay_ms cannot exceed max_delay_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub circuit_failure_threshold: u32,
    pub circuit_reopen_ms: u64,
    pub engine: PolicySettings,
    pub ocr: PolicySettings,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: 5,
            circuit_reopen_ms: 30_000,
            engine: PolicySettings::default(),
            ocr: PolicySettings {
                max_attempts: 2,
                base_delay_ms: 500,
                ..PolicySettings::default()
            },
        }
    }
}

impl RetrySettings {
    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            reopen_after: Duration::from_millis(self.circuit_reopen_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Raises the valid / needs_review thresholds.
    pub strict: bool,
    /// Overall score below which a document needs manual review.
    pub manual_review_below: f64,
    /// Any single dimension below this triggers manual review.
    pub dimension_floor: f64,
    /// OCR confidence below this triggers manual review.
    pub ocr_confidence_floor: f64,
    /// Dimensions below this get a recommendation.
    pub recommendation_below: f64,
    pub weights: QualityWeights,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            strict: false,
            manual_review_below: 0.70,
            dimension_floor: 0.50,
            ocr_confidence_floor: 0.80,
            recommendation_below: 0.80,
            weights: QualityWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Lenient mode: a failed non-critical stage degrades to an empty
    /// contribution instead of failing the document.
    pub skip_on_error: bool,
    pub document_timeout_ms: u64,
    pub max_document_bytes: usize,
    pub batch_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            skip_on_error: true,
            document_timeout_ms: 300_000,
            max_document_bytes: 50 * 1024 * 1024,
            batch_concurrency: 4,
        }
    }
}

impl PipelineSettings {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }
}

impl Settings {
    /// Parse and validate settings from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(toml_str)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file. The file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&raw)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(settings)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve `CASEMETA_CONFIG`, then the default config path, then defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&explicit));
        }
        match default_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ext = &self.extraction;
        if ext.engines.is_empty() && !ext.ocr_enabled {
            return Err(invalid(
                "extraction.engines",
                "no engines configured and OCR disabled",
            ));
        }
        if ext.min_text_length == 0 {
            return Err(invalid("extraction.min_text_length", "must be at least 1"));
        }
        if ext.scan_sample_pages == 0 {
            return Err(invalid("extraction.scan_sample_pages", "must be at least 1"));
        }
        if ext.engine_timeout_ms == 0 || ext.ocr_timeout_ms == 0 {
            return Err(invalid("extraction.engine_timeout_ms", "timeouts must be > 0"));
        }

        self.retry.engine.validate("retry.engine")?;
        self.retry.ocr.validate("retry.ocr")?;
        if self.retry.circuit_failure_threshold == 0 {
            return Err(invalid(
                "retry.circuit_failure_threshold",
                "must be at least 1",
            ));
        }

        self.quality.weights.validate()?;
        let q = &self.quality;
        for (field, value) in [
            ("quality.manual_review_below", q.manual_review_below),
            ("quality.dimension_floor", q.dimension_floor),
            ("quality.ocr_confidence_floor", q.ocr_confidence_floor),
            ("quality.recommendation_below", q.recommendation_below),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("{value} is outside [0, 1]")));
            }
        }

        let p = &self.pipeline;
        if p.document_timeout_ms == 0 {
            return Err(invalid("pipeline.document_timeout_ms", "must be > 0"));
        }
        if p.max_document_bytes == 0 {
            return Err(invalid("pipeline.max_document_bytes", "must be > 0"));
        }
        if p.batch_concurrency == 0 {
            return Err(invalid("pipeline.batch_concurrency", "must be at least 1"));
        }
        Ok(())
    }
}
