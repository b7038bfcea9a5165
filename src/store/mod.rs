//! Durable storage for chunked recordings
//!
//! Sessions and their audio chunks live in one embedded SQLite database so
//! that long recordings survive crashes and restarts:
//! - Session lifecycle (start, status updates, delete)
//! - Chunk ingestion with transactional aggregate updates
//! - Crash-recovery enumeration of unfinished sessions
//! - Reassembly of chunks into one recording
//! - Cleanup and storage accounting

mod error;
mod models;
mod recording_store;
mod schema;

pub use error::{StoreError, StoreResult};
pub use models::{AssembledRecording, AudioChunk, RecordingSession, SessionIntegrity, SessionStatus};
pub use recording_store::{RecordingStore, DEFAULT_CLEANUP_MAX_AGE};
pub use schema::SCHEMA_VERSION;
