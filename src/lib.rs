pub mod capture;
pub mod config;
pub mod http;
pub mod store;
pub mod upload;

pub use capture::{CaptureConfig, CaptureSummary, ChunkSink, ChunkedRecorder};
pub use config::Config;
pub use http::{create_router, AppState};
pub use store::{
    AssembledRecording, AudioChunk, RecordingSession, RecordingStore, SessionIntegrity,
    SessionStatus, StoreError, StoreResult, DEFAULT_CLEANUP_MAX_AGE,
};
pub use upload::{upload_session, RecordingTransport, UploadStage};
