use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a recording session.
///
/// Transitions are caller-driven and unchecked: any status may replace any
/// other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Recording,
    Paused,
    Completed,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Recording => "recording",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
        }
    }

    /// Statuses that mark a session as unfinished after a restart.
    pub const RESUMABLE: [SessionStatus; 2] = [SessionStatus::Recording, SessionStatus::Paused];

    /// Whether a session in this status is offered for recovery.
    pub fn is_resumable(&self) -> bool {
        Self::RESUMABLE.contains(self)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recording" => Ok(SessionStatus::Recording),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            "interrupted" => Ok(SessionStatus::Interrupted),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Aggregate metadata for one recording attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Unique session identifier (e.g., "rec-1730000000000-3f2a9c1d")
    pub id: String,

    /// Case or course this recording belongs to
    pub owner_id: String,

    /// Human-readable label
    pub name: String,

    /// When the session was started
    pub started_at: DateTime<Utc>,

    /// Refreshed on every chunk write and status change
    pub last_updated_at: DateTime<Utc>,

    /// Encoding of every chunk in the session (e.g., "audio/webm")
    pub mime_type: String,

    /// Highest stored chunk index + 1
    pub chunk_count: u64,

    /// Running sum of chunk payload sizes in bytes
    pub total_size: u64,

    pub status: SessionStatus,
}

/// One encoded audio segment, addressed by `(session_id, index)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub session_id: String,
    /// Zero-based, caller-supplied sequence number
    pub index: u32,
    pub data: Vec<u8>,
    /// Capture time
    pub timestamp: DateTime<Utc>,
}

/// A session's chunks concatenated in index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRecording {
    pub session_id: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AssembledRecording {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Stored aggregates of a session next to what a chunk scan finds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIntegrity {
    pub session_id: String,
    pub stored_chunk_count: u64,
    pub stored_total_size: u64,
    /// Number of chunk rows present
    pub scanned_chunks: u64,
    /// Sum of the sizes of the chunk rows present
    pub scanned_size: u64,
    pub highest_index: Option<u32>,
    /// Gaps below `stored_chunk_count` with no chunk row, as inclusive
    /// `(first, last)` index ranges
    pub missing_ranges: Vec<(u32, u32)>,
    /// Total number of indices covered by `missing_ranges`
    pub missing_count: u64,
}

impl SessionIntegrity {
    pub fn is_consistent(&self) -> bool {
        self.missing_count == 0
            && self.scanned_chunks == self.stored_chunk_count
            && self.scanned_size == self.stored_total_size
    }
}
