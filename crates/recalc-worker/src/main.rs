//! recalc worker - incremental formula recalculation over stdio.
//!
//! Reads one JSON request envelope per line from stdin and writes one JSON
//! response envelope per line to stdout. Logs go to stderr.

use std::path::PathBuf;

use clap::Parser;
use recalc_core::config::{DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS, DEFAULT_MIN_COLS, DEFAULT_MIN_ROWS};
use recalc_core::{EngineConfig, GridEvaluator, JsonDirStore};
use recalc_worker::{DEFAULT_QUEUE_CAPACITY, RequestEnvelope, WorkerConfig, WorkerHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "recalc-worker")]
#[command(about = "Incremental formula recalculation worker speaking JSON lines over stdio")]
#[command(version)]
struct Cli {
    /// Directory holding one <sheet_id>.json file per sheet
    #[arg(long, default_value = ".")]
    store_dir: PathBuf,

    /// Minimum rows of a loaded sheet
    #[arg(long, default_value_t = DEFAULT_MIN_ROWS)]
    min_rows: u32,

    /// Minimum columns of a loaded sheet
    #[arg(long, default_value_t = DEFAULT_MIN_COLS)]
    min_cols: u32,

    /// Rows past which a loaded sheet is stored sparsely
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
    max_rows: u32,

    /// Columns past which a loaded sheet is stored sparsely
    #[arg(long, default_value_t = DEFAULT_MAX_COLS)]
    max_cols: u32,

    /// Capacity of the request queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for responses
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = WorkerConfig {
        queue_capacity: cli.queue_capacity,
        engine: EngineConfig {
            min_rows: cli.min_rows,
            min_cols: cli.min_cols,
            max_rows: cli.max_rows,
            max_cols: cli.max_cols,
        },
    };
    tracing::info!("Serving sheets from {}", cli.store_dir.display());

    let store = JsonDirStore::new(&cli.store_dir);
    let mut worker = WorkerHandle::spawn(store, GridEvaluator::new(), config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => forward(&worker, &line).await?,
                None => {
                    tracing::debug!("stdin closed, draining queued requests");
                    stdin_open = false;
                    worker.close();
                }
            },
            response = worker.recv() => match response {
                Some(envelope) => {
                    let mut json = serde_json::to_string(&envelope)?;
                    json.push('\n');
                    stdout.write_all(json.as_bytes()).await?;
                    stdout.flush().await?;
                }
                None => break,
            },
        }
    }

    worker.shutdown()?;
    Ok(())
}

/// Parse one input line and queue it. Malformed lines are logged and dropped.
async fn forward(worker: &WorkerHandle, line: &str) -> anyhow::Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<RequestEnvelope>(line) {
        Ok(envelope) => worker.send(envelope).await?,
        Err(e) => tracing::warn!("Ignoring malformed message: {}", e),
    }
    Ok(())
}
