// Runs the blob_trails tick loop as a filter: blob updates come in as JSON lines
// on stdin, tracking results go out as JSON lines on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use blob_trails::{BlobUpdate, TickLoop, TickReport, TrackerConfig, TrackerRegistry, TrackingResult};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "trail_runner", about = "Line, circle and reference-path tracking for blob updates")]
struct Args {
    /// JSON tracker configuration. Defaults are used when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Extra reference path images, appended to the configured ones.
    #[arg(long = "path", value_name = "IMAGE")]
    paths: Vec<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct OutputLine<'a> {
    address: &'static str,
    timestamp: f64,
    #[serde(flatten)]
    result: &'a TrackingResult,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    config.reference_paths.extend(args.paths.iter().cloned());
    Ok(config)
}

async fn read_updates(updates: mpsc::UnboundedSender<BlobUpdate>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<BlobUpdate>(line) {
            Ok(update) => {
                if updates.send(update).is_err() {
                    break;
                }
            }
            Err(err) => warn!(%err, "skipping malformed update"),
        }
    }
    Ok(())
}

async fn write_reports<W: AsyncWrite + Unpin>(
    mut reports: mpsc::UnboundedReceiver<TickReport>,
    mut out: W,
) -> Result<()> {
    let mut buffer = Vec::new();
    while let Some(report) = reports.recv().await {
        if report.results.is_empty() {
            continue;
        }
        buffer.clear();
        for result in &report.results {
            let line = OutputLine {
                address: result.address(),
                timestamp: report.timestamp,
                result,
            };
            serde_json::to_writer(&mut buffer, &line)?;
            buffer.push(b'\n');
        }
        out.write_all(&buffer).await?;
        out.flush().await?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let registry = TrackerRegistry::from_config(config).context("building tracker registry")?;
    info!(reference_paths = registry.references().len(), "registry ready");

    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);

    let reader = tokio::spawn(read_updates(update_tx));
    let writer = tokio::spawn(write_reports(report_rx, tokio::io::stdout()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = stop_tx.send(true);
        }
    });

    let registry = TickLoop::new(registry, update_rx, report_tx, stop_rx).run().await;
    info!(blobs = registry.len(), "shutting down");

    reader.abort();
    writer.await??;
    Ok(())
}
