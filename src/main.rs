use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};

use casemeta::pipeline::{BatchDocument, JsonFilePersistence};
use casemeta::{init_tracing, PipelineOrchestrator, Settings};

/// Extract confidence-scored legal metadata from court documents.
#[derive(Debug, Parser)]
#[command(name = "casemeta", version)]
struct Cli {
    /// Documents to process.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Also write each record to `<DIR>/<document_id>.json`.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Documents processed concurrently (defaults to pipeline.batch_concurrency).
    #[arg(long, default_value_t = 0)]
    concurrency: usize,

    /// Pretty-print records.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run(Cli::parse()).await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

/// An unreadable file becomes a failed record; the rest of the batch runs.
fn load(path: &Path) -> BatchDocument {
    match std::fs::read(path) {
        Ok(bytes) => BatchDocument::new(bytes),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Cannot read input");
            BatchDocument::unreadable(&path.display().to_string(), err)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::discover().context("failed to load configuration")?;
    let mut orchestrator =
        PipelineOrchestrator::new(settings).context("invalid configuration")?;
    if let Some(dir) = &cli.out {
        orchestrator = orchestrator.with_persistence(Arc::new(JsonFilePersistence::new(dir)));
    }

    let documents = cli.files.iter().map(|path| load(path)).collect();

    let records = orchestrator.process_batch(documents, cli.concurrency).await;
    for record in &records {
        let json = if cli.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };
        println!("{json}");
    }

    let failed = records.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} documents failed", records.len());
    }
    Ok(())
}
