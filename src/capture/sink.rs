use async_trait::async_trait;
use std::sync::Arc;

use crate::store::{RecordingStore, SessionStatus, StoreResult};

/// Destination for chunks produced by the capture loop
///
/// Implemented by `RecordingStore`; tests substitute failing sinks.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Durably store one chunk. Retries hand over the same shared buffer.
    async fn save_chunk(&self, session_id: &str, index: u32, data: Arc<[u8]>) -> StoreResult<()>;

    /// Record the session's final (or intermediate) status
    async fn update_session_status(&self, session_id: &str, status: SessionStatus)
        -> StoreResult<()>;
}

#[async_trait]
impl ChunkSink for RecordingStore {
    async fn save_chunk(&self, session_id: &str, index: u32, data: Arc<[u8]>) -> StoreResult<()> {
        self.write_chunk(session_id, index, data).await
    }

    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<()> {
        RecordingStore::update_session_status(self, session_id, status).await
    }
}
