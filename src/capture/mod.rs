pub mod recorder;
pub mod sink;

pub use recorder::{CaptureConfig, CaptureSummary, ChunkedRecorder};
pub use sink::ChunkSink;
