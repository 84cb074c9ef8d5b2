pub mod extraction;
pub mod entities;
pub mod metadata;
pub mod quality;
pub mod record;
pub mod sink;
pub mod processor;

pub use metadata::DocumentMetadata;
pub use processor::{BatchDocument, PipelineOrchestrator};
pub use record::{ErrorCategory, PipelineRecord, RecordStatus, StageError, StageLogEntry, StageStatus};
pub use sink::{
    CollectingEventSink, EventSink, JsonFilePersistence, PersistError, PersistenceLayer,
    ProgressCallback, StageEvent, TracingEventSink,
};
