use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_recordings::{
    create_router, AppState, CaptureConfig, CaptureSummary, ChunkedRecorder, Config,
    RecordingStore, SessionStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loqa-recordings", about = "Durable chunked recording store")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/loqa-recordings")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve,
    /// Record encoded audio piped on stdin into a new session
    Capture {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "audio/webm")]
        mime_type: String,
        /// Bytes per stored chunk
        #[arg(long, default_value_t = 64 * 1024)]
        chunk_bytes: usize,
    },
    /// List every session
    List,
    /// List sessions left recording or paused
    Interrupted,
    /// Write a session's reassembled audio to a file
    Export { session_id: String, output: PathBuf },
    /// Compare stored aggregates against the session's chunks
    Inspect { session_id: String },
    /// Set a session's status
    Status {
        session_id: String,
        status: SessionStatus,
    },
    /// Delete a session and its chunks
    Delete { session_id: String },
    /// Delete completed sessions older than the max age
    Cleanup {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Show bytes held by the store
    Usage,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    let store = Arc::new(RecordingStore::new(cfg.store.path.clone()));

    match cli.command {
        Command::Serve => serve(&cfg, store).await?,
        Command::Capture {
            owner,
            name,
            mime_type,
            chunk_bytes,
        } => {
            let session_id = store.start_session(&owner, &name, &mime_type).await?;
            println!("Recording into {}", session_id);

            let mut capture = CaptureConfig::new(session_id);
            capture.max_pending_chunks = cfg.capture.max_pending_chunks;
            let summary = capture_stdin(capture, store, chunk_bytes.max(1)).await?;
            println!(
                "{}: {} chunks, {} bytes saved ({})",
                summary.session_id, summary.chunks_saved, summary.bytes_saved, summary.final_status
            );
        }
        Command::List => {
            for session in store.list_sessions().await? {
                print_session(&session);
            }
        }
        Command::Interrupted => {
            let sessions = store.get_interrupted_sessions().await?;
            println!("{} unfinished recording(s)", sessions.len());
            for session in &sessions {
                print_session(session);
            }
        }
        Command::Export { session_id, output } => {
            let Some(recording) = store.assemble_recording(&session_id).await? else {
                anyhow::bail!("Recording {} not found", session_id);
            };
            tokio::fs::write(&output, &recording.data)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Wrote {} bytes ({}) to {}",
                recording.size(),
                recording.mime_type,
                output.display()
            );
        }
        Command::Inspect { session_id } => {
            let Some(report) = store.inspect_session(&session_id).await? else {
                anyhow::bail!("Recording {} not found", session_id);
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_consistent() {
                println!("Stored aggregates do not match the chunks on disk");
            }
        }
        Command::Status { session_id, status } => {
            store.update_session_status(&session_id, status).await?;
        }
        Command::Delete { session_id } => {
            if !store.delete_session(&session_id).await? {
                println!("No recording {} (nothing deleted)", session_id);
            }
        }
        Command::Cleanup { max_age_hours } => {
            let max_age = max_age_hours
                .map(|hours| Duration::from_secs(hours.saturating_mul(60 * 60)))
                .unwrap_or_else(|| cfg.cleanup_max_age());
            let deleted = store.cleanup_old_sessions(max_age).await?;
            println!("Deleted {} completed recording(s)", deleted);
        }
        Command::Usage => {
            let bytes = store.get_storage_size().await?;
            println!("{} bytes in {}", bytes, store.db_path().display());
        }
    }

    Ok(())
}

async fn serve(cfg: &Config, store: Arc<RecordingStore>) -> Result<()> {
    info!("{} starting", cfg.service.name);
    info!("Recording store: {}", store.db_path().display());

    // Surface leftovers from a previous run before taking new traffic.
    let unfinished = store.get_interrupted_sessions().await?;
    if !unfinished.is_empty() {
        info!("{} recording(s) awaiting recovery", unfinished.len());
    }

    let state = AppState::new(store).with_cleanup_max_age(cfg.cleanup_max_age());
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}

/// Feed stdin to the chunked recorder in `chunk_bytes` pieces until EOF.
async fn capture_stdin(
    config: CaptureConfig,
    store: Arc<RecordingStore>,
    chunk_bytes: usize,
) -> Result<CaptureSummary> {
    let (chunk_tx, chunk_rx) = mpsc::channel(8);
    let recorder = ChunkedRecorder::new(config, store);
    let recording = tokio::spawn(recorder.record(chunk_rx));

    let mut stdin = tokio::io::stdin();
    loop {
        let mut chunk = Vec::with_capacity(chunk_bytes);
        let read = (&mut stdin)
            .take(chunk_bytes as u64)
            .read_to_end(&mut chunk)
            .await
            .context("Failed to read audio from stdin")?;
        if read == 0 {
            break;
        }
        if chunk_tx.send(chunk).await.is_err() {
            anyhow::bail!("Recorder stopped before input ended");
        }
    }
    drop(chunk_tx);

    recording.await.context("Recorder task panicked")?
}

fn print_session(session: &loqa_recordings::RecordingSession) {
    println!(
        "{}  {:<11}  {:>4} chunks  {:>10} bytes  {}  {} ({})",
        session.id,
        session.status,
        session.chunk_count,
        session.total_size,
        session.last_updated_at.to_rfc3339(),
        session.name,
        session.owner_id
    );
}
