use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uploadgrid_core::{ObjectUrlPreviews, RawFile, UploadStatus};
use uploadgrid_session::{
    SessionHandle, SessionView,
    config::load_config,
    sim::{SimulatedTransport, SimulationConfig},
    spawn_session,
};

/// Upper bound for a batch to settle before the run is abandoned.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "uploadgrid")]
struct UploadArgs {
    /// Image files to upload, in display order.
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Session config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    min_display_ms: Option<u64>,
    #[arg(long)]
    retry_stagger_ms: Option<u64>,
    /// Reorder before finalizing, as FROM:TO positions.
    #[arg(long = "move", value_parser = parse_move)]
    moves: Vec<(usize, usize)>,
    /// Make the first attempt of the named file fail midway.
    #[arg(long)]
    fail: Vec<String>,
    /// Retry every failed item once the batch has settled.
    #[arg(long, default_value_t = false)]
    retry_failed: bool,
    #[arg(long, default_value = "https://uploads.example/files")]
    base_url: String,
    #[arg(long, default_value_t = 25)]
    chunk_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = UploadArgs::parse();
    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: UploadArgs) -> Result<(), String> {
    let mut config = load_config(args.config.as_deref());
    if let Some(ms) = args.min_display_ms {
        config.min_display_ms = ms;
    }
    if let Some(ms) = args.retry_stagger_ms {
        config.retry_stagger_ms = ms;
    }

    let mut simulation = SimulationConfig {
        chunk_delay: Duration::from_millis(args.chunk_delay_ms),
        base_url: args.base_url.clone(),
        ..SimulationConfig::default()
    };
    for name in &args.fail {
        simulation = simulation.failing(name.clone(), 1);
    }

    let files = read_files(args.files).await?;
    let (session, task) = spawn_session(
        config,
        |events| SimulatedTransport::new(simulation, events),
        ObjectUrlPreviews::new(),
    );

    let result = drive(&session, files, &args.moves, args.retry_failed).await;
    session.shutdown();
    if let Err(err) = task.await {
        warn!("session task ended abnormally: {}", err);
    }
    let json = result?;
    println!("{json}");
    Ok(())
}

async fn drive(
    session: &SessionHandle,
    files: Vec<RawFile>,
    moves: &[(usize, usize)],
    retry_failed: bool,
) -> Result<String, String> {
    let report = session.add_files(files).await.map_err(|e| e.to_string())?;
    for rejection in &report.rejected {
        warn!("skipped: {}", rejection);
    }
    if report.accepted.is_empty() {
        return Err("no acceptable files to upload".to_string());
    }

    for &(from, to) in moves {
        session
            .reorder(from, Some(to))
            .await
            .map_err(|e| format!("move {from}:{to} rejected: {e}"))?;
    }

    let mut view = settle(session).await?;
    if retry_failed && has_failures(&view) {
        let queued = session.retry_all().await.map_err(|e| e.to_string())?;
        info!("retrying {} failed uploads", queued);
        view = settle(session).await?;
    }

    if let Some(batch) = view.last_batch {
        info!(
            succeeded = batch.succeeded,
            failed = batch.failed,
            "last transport batch"
        );
    }

    match session.finalize().await {
        Ok(finalized) => serde_json::to_string_pretty(&finalized).map_err(|e| e.to_string()),
        Err(err) => {
            let detail = view.last_error.unwrap_or_else(|| err.to_string());
            Err(format!("batch not ready: {detail}"))
        }
    }
}

async fn settle(session: &SessionHandle) -> Result<SessionView, String> {
    timeout(SETTLE_TIMEOUT, session.wait_until(SessionView::is_settled))
        .await
        .map_err(|_| "uploads did not settle in time".to_string())?
        .map_err(|e| e.to_string())
}

fn has_failures(view: &SessionView) -> bool {
    view.items
        .iter()
        .any(|item| item.status == UploadStatus::Failed)
}

async fn read_files(paths: Vec<PathBuf>) -> Result<Vec<RawFile>, String> {
    tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|path| {
                let data = std::fs::read(path)
                    .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".to_string());
                Ok(RawFile::new(name, mime_for_path(path), data))
            })
            .collect::<Result<Vec<_>, String>>()
    })
    .await
    .map_err(|e| e.to_string())?
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

fn parse_move(value: &str) -> Result<(usize, usize), String> {
    let (from, to) = value
        .split_once(':')
        .ok_or_else(|| format!("expected FROM:TO, got {value}"))?;
    let from = from.trim().parse().map_err(|_| format!("bad FROM in {value}"))?;
    let to = to.trim().parse().map_err(|_| format!("bad TO in {value}"))?;
    Ok((from, to))
}
