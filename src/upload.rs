use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::store::{AssembledRecording, RecordingSession, RecordingStore};

/// Progress milestones reported while handing a recording to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum UploadStage {
    Assembling,
    Uploading { bytes: u64 },
    Uploaded,
    Failed { reason: String },
}

/// Network side of the upload: ships an assembled recording to the remote
/// backend and relays progress to whoever is watching.
#[async_trait]
pub trait RecordingTransport: Send + Sync {
    async fn upload(&self, session: &RecordingSession, recording: &AssembledRecording) -> Result<()>;

    async fn report_progress(&self, session_id: &str, stage: UploadStage);
}

/// Assemble a session and upload it.
///
/// Returns `Ok(false)` when the session does not exist. Nothing is retried
/// here; a failed upload leaves the local chunks untouched.
pub async fn upload_session(
    store: &RecordingStore,
    transport: &dyn RecordingTransport,
    session_id: &str,
) -> Result<bool> {
    let Some(session) = store
        .get_session(session_id)
        .await
        .context("Failed to load session")?
    else {
        return Ok(false);
    };

    transport
        .report_progress(session_id, UploadStage::Assembling)
        .await;

    // The session may have been deleted between the two calls.
    let Some(recording) = store
        .assemble_recording(session_id)
        .await
        .context("Failed to assemble recording")?
    else {
        return Ok(false);
    };

    transport
        .report_progress(
            session_id,
            UploadStage::Uploading {
                bytes: recording.size() as u64,
            },
        )
        .await;

    if let Err(e) = transport.upload(&session, &recording).await {
        error!("Upload of session {} failed: {:#}", session_id, e);
        transport
            .report_progress(
                session_id,
                UploadStage::Failed {
                    reason: format!("{e:#}"),
                },
            )
            .await;
        return Err(e.context(format!("Failed to upload session {session_id}")));
    }

    transport
        .report_progress(session_id, UploadStage::Uploaded)
        .await;
    info!(
        "Uploaded session {} ({} bytes, {})",
        session_id,
        recording.size(),
        recording.mime_type
    );

    Ok(true)
}
