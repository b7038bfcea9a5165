//! HTTP API for capture front-ends
//!
//! Exposes the recording store over REST:
//! - POST /recordings - Start a session
//! - PUT /recordings/:id/chunks/:index - Store one chunk
//! - PUT /recordings/:id/status - Update session status
//! - GET /recordings/interrupted - Sessions to offer for recovery
//! - GET /recordings/:id/audio - Reassembled recording
//! - DELETE /recordings/:id - Discard a session and its chunks
//! - POST /recordings/cleanup - Remove old completed sessions
//! - GET /recordings/usage - Bytes held by the store
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
