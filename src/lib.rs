pub mod config;
pub mod pipeline;
pub mod resilience;

use tracing_subscriber::EnvFilter;

pub use config::{ConfigError, Settings};
pub use pipeline::{BatchDocument, PipelineOrchestrator, PipelineRecord, RecordStatus};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
