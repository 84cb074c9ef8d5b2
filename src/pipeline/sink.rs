//! Boundaries to external collaborators: stage events, progress reporting
//! and record persistence.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use super::record::{PipelineRecord, StageStatus};

// ═══════════════════════════════════════════
// Stage events
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub stage: String,
    pub document_id: String,
    pub status: StageStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Receives one event per stage invocation. Fire-and-forget.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StageEvent);
}

/// Forwards stage events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &StageEvent) {
        match event.status {
            StageStatus::Success => tracing::info!(
                stage = %event.stage,
                document_id = %event.document_id,
                duration_ms = event.duration_ms,
                "Stage complete"
            ),
            StageStatus::Degraded | StageStatus::Failed => tracing::warn!(
                stage = %event.stage,
                document_id = %event.document_id,
                status = event.status.as_str(),
                duration_ms = event.duration_ms,
                error = event.error.as_deref().unwrap_or(""),
                "Stage did not succeed"
            ),
            StageStatus::Skipped => tracing::debug!(
                stage = %event.stage,
                document_id = %event.document_id,
                "Stage skipped"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<StageEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &StageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ═══════════════════════════════════════════
// Progress
// ═══════════════════════════════════════════

pub type ProgressError = Box<dyn std::error::Error + Send + Sync>;

/// `(stage, percent_complete)`. Errors are logged and never abort processing.
pub type ProgressCallback = Arc<dyn Fn(&str, u8) -> Result<(), ProgressError> + Send + Sync>;

// ═══════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Record rejected: {0}")]
    Rejected(String),
}

/// Accepts finished records. The pipeline hands each record over once and
/// does not retry on failure.
pub trait PersistenceLayer: Send + Sync {
    fn persist(&self, record: &PipelineRecord) -> Result<(), PersistError>;
}

/// Writes each record as `<dir>/<document_id>.json`, atomically.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{document_id}.json"))
    }
}

impl PersistenceLayer for JsonFilePersistence {
    fn persist(&self, record: &PipelineRecord) -> Result<(), PersistError> {
        if record.document_id.contains(['/', '\\']) || record.document_id.starts_with('.') {
            return Err(PersistError::Rejected(format!(
                "document id '{}' is not a safe file name",
                record.document_id
            )));
        }
        std::fs::create_dir_all(&self.dir)?;

        let mut staged = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut staged, record)?;
        staged.flush()?;

        let path = self.path_for(&record.document_id);
        staged.persist(&path).map_err(|e| PersistError::Io(e.error))?;

        tracing::debug!(
            document_id = %record.document_id,
            path = %path.display(),
            "Record persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    use crate::pipeline::record::RecordStatus;

    fn record(id: &str) -> PipelineRecord {
        PipelineRecord {
            document_id: id.to_string(),
            status: RecordStatus::Failed,
            content_hash: "hash".into(),
            extraction: None,
            text: String::new(),
            entities: BTreeMap::new(),
            metadata: None,
            quality: None,
            execution_log: vec![],
            failure: None,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn json_persistence_round_trips_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFilePersistence::new(dir.path().join("records"));
        let original = record("doc-1");
        sink.persist(&original).unwrap();

        let raw = std::fs::read_to_string(sink.path_for("doc-1")).unwrap();
        let loaded: PipelineRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn unsafe_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFilePersistence::new(dir.path());
        let err = sink.persist(&record("../escape")).unwrap_err();
        assert!(matches!(err, PersistError::Rejected(_)));
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingEventSink::new();
        for stage in ["validation", "extraction"] {
            sink.emit(&StageEvent {
                stage: stage.into(),
                document_id: "d".into(),
                status: StageStatus::Success,
                duration_ms: 1,
                error: None,
            });
        }
        let stages: Vec<_> = sink.events().into_iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec!["validation", "extraction"]);
    }
}
