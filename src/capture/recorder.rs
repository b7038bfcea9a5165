use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::sink::ChunkSink;
use crate::store::SessionStatus;

/// Capture loop configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Session the chunks belong to (from `RecordingStore::start_session`)
    pub session_id: String,
    /// Chunks kept for retry while storage is failing (default: 32)
    pub max_pending_chunks: usize,
}

impl CaptureConfig {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            max_pending_chunks: 32,
        }
    }
}

/// Outcome of one capture run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub session_id: String,
    /// Chunks handed over by the encoder
    pub chunks_received: usize,
    /// Chunks durably stored, including ones saved on retry
    pub chunks_saved: usize,
    /// Chunks evicted from a full retry backlog
    pub chunks_dropped: usize,
    /// Chunks still unsaved when the channel closed
    pub chunks_pending: usize,
    pub bytes_saved: u64,
    /// `Completed` when every chunk was kept, `Interrupted` otherwise
    pub final_status: SessionStatus,
}

struct PendingChunk {
    index: u32,
    data: Arc<[u8]>,
}

/// Chunked recording loop
///
/// Receives encoded chunks from the capture layer, numbers them in arrival
/// order and stores each one through a `ChunkSink`. Storage failures never
/// stop the loop: failed chunks wait in a bounded backlog and are retried
/// before the next chunk is stored.
pub struct ChunkedRecorder {
    config: CaptureConfig,
    sink: Arc<dyn ChunkSink>,
    next_index: u32,
    pending: VecDeque<PendingChunk>,
    summary: CaptureSummary,
}

impl ChunkedRecorder {
    pub fn new(config: CaptureConfig, sink: Arc<dyn ChunkSink>) -> Self {
        info!(
            "Chunked recorder initialized: {} (backlog: {} chunks)",
            config.session_id, config.max_pending_chunks
        );

        let summary = CaptureSummary {
            session_id: config.session_id.clone(),
            chunks_received: 0,
            chunks_saved: 0,
            chunks_dropped: 0,
            chunks_pending: 0,
            bytes_saved: 0,
            final_status: SessionStatus::Recording,
        };

        Self {
            config,
            sink,
            next_index: 0,
            pending: VecDeque::new(),
            summary,
        }
    }

    /// Store incoming chunks until the sender side closes, then mark the
    /// session finished.
    pub async fn record(mut self, mut chunk_rx: mpsc::Receiver<Vec<u8>>) -> Result<CaptureSummary> {
        info!("Starting chunked recording for {}", self.config.session_id);

        while let Some(data) = chunk_rx.recv().await {
            let index = self.next_index;
            self.next_index += 1;
            self.summary.chunks_received += 1;

            // Backlog first; while storage keeps failing, queue without a fresh attempt.
            let data: Arc<[u8]> = data.into();
            if self.flush_pending().await {
                self.store(index, data).await;
            } else {
                self.enqueue(PendingChunk { index, data });
            }
        }

        self.flush_pending().await;

        let final_status = if self.pending.is_empty() && self.summary.chunks_dropped == 0 {
            SessionStatus::Completed
        } else {
            SessionStatus::Interrupted
        };
        self.summary.final_status = final_status;
        self.summary.chunks_pending = self.pending.len();

        self.sink
            .update_session_status(&self.config.session_id, final_status)
            .await
            .with_context(|| {
                format!(
                    "Failed to mark session {} as {}",
                    self.config.session_id, final_status
                )
            })?;

        info!(
            "Chunked recording complete: {} ({} saved, {} dropped, {} pending, {} bytes)",
            self.config.session_id,
            self.summary.chunks_saved,
            self.summary.chunks_dropped,
            self.summary.chunks_pending,
            self.summary.bytes_saved
        );

        Ok(self.summary)
    }

    async fn store(&mut self, index: u32, data: Arc<[u8]>) {
        let result = self
            .sink
            .save_chunk(&self.config.session_id, index, Arc::clone(&data))
            .await;
        match result {
            Ok(()) => self.mark_saved(index, data.len()),
            Err(e) => {
                error!(
                    "Could not save chunk {} of {} locally: {}",
                    index, self.config.session_id, e
                );
                self.enqueue(PendingChunk { index, data });
            }
        }
    }

    /// Retry backlog chunks oldest first. Returns true once the backlog is
    /// empty; stops at the first failure.
    async fn flush_pending(&mut self) -> bool {
        while let Some(chunk) = self.pending.front() {
            let (index, size, data) = (chunk.index, chunk.data.len(), Arc::clone(&chunk.data));
            let result = self
                .sink
                .save_chunk(&self.config.session_id, index, data)
                .await;
            match result {
                Ok(()) => {
                    self.pending.pop_front();
                    info!("Chunk {} of {} saved on retry", index, self.config.session_id);
                    self.mark_saved(index, size);
                }
                Err(e) => {
                    debug!(
                        "Retry of chunk {} for {} failed: {}",
                        index, self.config.session_id, e
                    );
                    return false;
                }
            }
        }
        true
    }

    fn enqueue(&mut self, chunk: PendingChunk) {
        if self.config.max_pending_chunks == 0 {
            warn!(
                "Dropping chunk {} of {}: retry backlog disabled",
                chunk.index, self.config.session_id
            );
            self.summary.chunks_dropped += 1;
            return;
        }

        if self.pending.len() >= self.config.max_pending_chunks {
            if let Some(evicted) = self.pending.pop_front() {
                warn!(
                    "Retry backlog full, dropping chunk {} of {}",
                    evicted.index, self.config.session_id
                );
                self.summary.chunks_dropped += 1;
            }
        }

        self.pending.push_back(chunk);
    }

    fn mark_saved(&mut self, index: u32, size: usize) {
        debug!("Chunk {} of {} stored ({} bytes)", index, self.config.session_id, size);
        self.summary.chunks_saved += 1;
        self.summary.bytes_saved += size as u64;
    }
}
