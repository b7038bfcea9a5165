use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::error::{StoreError, StoreResult};
use super::models::{AssembledRecording, AudioChunk, RecordingSession, SessionIntegrity, SessionStatus};
use super::schema;

/// Completed sessions older than this are collected by default (24 hours).
pub const DEFAULT_CLEANUP_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const SESSION_COLUMNS: &str = "id, owner_id, name, started_at, last_updated_at, mime_type, \
                               chunk_count, total_size, status";

type SharedConnection = Arc<Mutex<Connection>>;

/// Durable store for chunked recordings.
///
/// Owns one SQLite database with a `sessions` table and a `chunks` table.
/// The database is opened lazily on first use; concurrent first callers all
/// await the same open. If the open fails, the next call tries again.
///
/// Meant to be created once per process and shared behind an `Arc`.
pub struct RecordingStore {
    db_path: PathBuf,
    conn: OnceCell<SharedConnection>,
    opens: AtomicUsize,
}

impl RecordingStore {
    /// Create a handle for the database at `db_path`. Nothing is opened yet.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: OnceCell::new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of times the underlying database has been opened. Stays at 1
    /// for a healthy store no matter how many callers raced the first use.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Start a new session in `recording` status and return its id.
    pub async fn start_session(
        &self,
        owner_id: &str,
        name: &str,
        mime_type: &str,
    ) -> StoreResult<String> {
        let now = Utc::now();
        let session = RecordingSession {
            id: new_session_id(now),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            started_at: now,
            last_updated_at: now,
            mime_type: mime_type.to_string(),
            chunk_count: 0,
            total_size: 0,
            status: SessionStatus::Recording,
        };
        let id = session.id.clone();

        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO sessions
                  (id, owner_id, name, started_at, last_updated_at, mime_type, chunk_count, total_size, status)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7)
                "#,
                params![
                    session.id,
                    session.owner_id,
                    session.name,
                    format_timestamp(&session.started_at),
                    format_timestamp(&session.last_updated_at),
                    session.mime_type,
                    session.status.as_str(),
                ],
            )?;
            Ok(())
        })
        .await?;

        info!("Started recording session {} (owner={}, mime={})", id, owner_id, mime_type);
        Ok(id)
    }

    /// Persist one chunk and fold it into the session aggregates in a single
    /// transaction.
    ///
    /// Re-saving an index replaces its bytes, but `total_size` still grows by
    /// the new payload size. Chunks for unknown sessions are stored without
    /// touching any aggregate.
    pub async fn save_chunk(&self, session_id: &str, index: u32, data: Vec<u8>) -> StoreResult<()> {
        self.write_chunk(session_id, index, data).await
    }

    /// `save_chunk` for any owned buffer, so shared buffers reach SQLite
    /// without a copy.
    pub(crate) async fn write_chunk<D>(&self, session_id: &str, index: u32, data: D) -> StoreResult<()>
    where
        D: AsRef<[u8]> + Send + 'static,
    {
        let size = data.as_ref().len();
        let chunk_session = session_id.to_string();
        let attached = self
            .run(move |conn| {
                let now = format_timestamp(&Utc::now());
                let tx = conn.transaction()?;
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO chunks (session_id, chunk_index, data, timestamp)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![chunk_session, index, data.as_ref(), now],
                )?;
                let updated = tx.execute(
                    r#"
                    UPDATE sessions
                    SET chunk_count = MAX(chunk_count, ?2),
                        total_size = total_size + ?3,
                        last_updated_at = ?4
                    WHERE id = ?1
                    "#,
                    params![chunk_session, i64::from(index) + 1, size as i64, now],
                )?;
                tx.commit()?;
                Ok(updated > 0)
            })
            .await?;

        if attached {
            debug!("Saved chunk {} of session {} ({} bytes)", index, session_id, size);
        } else {
            warn!(
                "Stored chunk {} for unknown session {} ({} bytes); aggregates not updated",
                index, session_id, size
            );
        }

        Ok(())
    }

    /// Set the session status. Unknown ids are ignored.
    pub async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<()> {
        let id = session_id.to_string();
        let updated = self
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE sessions SET status = ?2, last_updated_at = ?3 WHERE id = ?1",
                    params![id, status.as_str(), format_timestamp(&Utc::now())],
                )?;
                Ok(changed > 0)
            })
            .await?;

        if updated {
            info!("Session {} is now {}", session_id, status);
        } else {
            debug!("Status update for unknown session {} ignored", session_id);
        }

        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> StoreResult<Option<RecordingSession>> {
        let id = session_id.to_string();
        self.run(move |conn| fetch_session(conn, &id)).await
    }

    /// Every session, most recently updated first.
    pub async fn list_sessions(&self) -> StoreResult<Vec<RecordingSession>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY last_updated_at DESC"
            );
            query_sessions(conn, &sql)
        })
        .await
    }

    /// Sessions left in `recording` or `paused`, most recently updated first.
    pub async fn get_interrupted_sessions(&self) -> StoreResult<Vec<RecordingSession>> {
        let sessions = self
            .run(|conn| {
                let resumable = SessionStatus::RESUMABLE
                    .iter()
                    .map(|status| format!("'{}'", status.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions \
                     WHERE status IN ({resumable}) \
                     ORDER BY last_updated_at DESC"
                );
                query_sessions(conn, &sql)
            })
            .await?;

        if !sessions.is_empty() {
            info!("Found {} unfinished recording(s)", sessions.len());
        }

        Ok(sessions)
    }

    /// Every chunk stored under `session_id`, in index order. Works for
    /// orphan chunks too.
    pub async fn get_chunks(&self, session_id: &str) -> StoreResult<Vec<AudioChunk>> {
        let id = session_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_index, data, timestamp FROM chunks WHERE session_id = ?1 ORDER BY chunk_index",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(index, data, timestamp)| -> StoreResult<AudioChunk> {
                    Ok(AudioChunk {
                        session_id: id.clone(),
                        index,
                        data,
                        timestamp: parse_timestamp(&timestamp)?,
                    })
                })
                .collect()
        })
        .await
    }

    /// Concatenate the session's chunks in ascending index order.
    ///
    /// Missing indices are skipped, not reported. Returns `None` when the
    /// session does not exist.
    pub async fn assemble_recording(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<AssembledRecording>> {
        let id = session_id.to_string();
        let recording = self
            .run(move |conn| {
                let Some(session) = fetch_session(conn, &id)? else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    "SELECT chunk_index, data FROM chunks WHERE session_id = ?1",
                )?;
                let mut chunks = stmt
                    .query_map(params![id], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                // Row order is whatever SQLite hands back; index order is what counts.
                chunks.sort_by_key(|(index, _)| *index);

                let total: usize = chunks.iter().map(|(_, data)| data.len()).sum();
                let mut data = Vec::with_capacity(total);
                for (_, chunk) in chunks {
                    data.extend_from_slice(&chunk);
                }

                Ok(Some(AssembledRecording {
                    session_id: session.id,
                    mime_type: session.mime_type,
                    data,
                }))
            })
            .await?;

        if let Some(recording) = &recording {
            info!(
                "Assembled session {}: {} bytes ({})",
                session_id,
                recording.size(),
                recording.mime_type
            );
        }

        Ok(recording)
    }

    /// Delete the session and all of its chunks in one transaction.
    ///
    /// Returns whether a session record existed. Chunks stored under an
    /// unknown id are removed either way.
    pub async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        let id = session_id.to_string();
        let (chunks, existed) = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let chunks = tx.execute("DELETE FROM chunks WHERE session_id = ?1", params![id])?;
                let sessions = tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok((chunks, sessions > 0))
            })
            .await?;

        if existed || chunks > 0 {
            info!("Deleted session {} ({} chunks)", session_id, chunks);
        }

        Ok(existed)
    }

    /// Delete completed sessions not updated within `max_age`.
    pub async fn cleanup_old_sessions(&self, max_age: Duration) -> StoreResult<usize> {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_sessions_before(cutoff).await
    }

    /// Delete completed sessions whose last update is at or before `cutoff`.
    ///
    /// Sessions in any other status are never touched. A failed delete is
    /// logged and the remaining sessions are still processed. Returns how
    /// many sessions were deleted.
    pub async fn cleanup_sessions_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let candidates = self
            .run(|conn| {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'completed'"
                );
                query_sessions(conn, &sql)
            })
            .await?;

        let mut deleted = 0;
        for session in candidates
            .into_iter()
            .filter(|session| session.last_updated_at <= cutoff)
        {
            match self.delete_session(&session.id).await {
                Ok(_) => deleted += 1,
                Err(e) => warn!("Failed to clean up session {}: {}", session.id, e),
            }
        }

        if deleted > 0 {
            info!("Cleaned up {} completed session(s)", deleted);
        }

        Ok(deleted)
    }

    /// Sum of `total_size` over every session in the store.
    pub async fn get_storage_size(&self) -> StoreResult<u64> {
        self.run(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(total_size), 0) FROM sessions",
                [],
                |row| row.get(0),
            )?;
            to_u64(total, "total_size")
        })
        .await
    }

    /// Compare the stored aggregates of a session against its chunk rows.
    pub async fn inspect_session(&self, session_id: &str) -> StoreResult<Option<SessionIntegrity>> {
        let id = session_id.to_string();
        self.run(move |conn| {
            let Some(session) = fetch_session(conn, &id)? else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT chunk_index, length(data) FROM chunks WHERE session_id = ?1 ORDER BY chunk_index",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut scanned_size = 0u64;
            for (_, size) in &rows {
                scanned_size += to_u64(*size, "chunk size")?;
            }
            let present: Vec<u32> = rows.iter().map(|(index, _)| *index).collect();
            let missing_ranges = missing_ranges(&present, session.chunk_count);
            let missing_count = missing_ranges
                .iter()
                .map(|(first, last)| u64::from(last - first) + 1)
                .sum();

            Ok(Some(SessionIntegrity {
                session_id: session.id,
                stored_chunk_count: session.chunk_count,
                stored_total_size: session.total_size,
                scanned_chunks: present.len() as u64,
                scanned_size,
                highest_index: present.last().copied(),
                missing_ranges,
                missing_count,
            }))
        })
        .await
    }

    async fn connection(&self) -> StoreResult<SharedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async move {
                let path = self.db_path.clone();
                let conn = tokio::task::spawn_blocking(move || schema::open_database(&path)).await??;
                self.opens.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
            })
            .await?;
        Ok(Arc::clone(conn))
    }

    /// Run `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || {
            // Transactions roll back on drop, so a panicked operation leaves
            // the connection usable.
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut *guard)
        })
        .await?
    }
}

/// Gaps in the sorted `present` indices below `chunk_count`, as inclusive
/// ranges. One pass over the stored rows; the size of a gap never matters.
fn missing_ranges(present: &[u32], chunk_count: u64) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut next = 0u64;
    let bounds = present
        .iter()
        .map(|&index| u64::from(index))
        .filter(|&index| index < chunk_count)
        .chain(std::iter::once(chunk_count));
    for index in bounds {
        if index > next {
            // next < index <= chunk_count <= u32::MAX + 1, so both ends fit in u32.
            ranges.push((next as u32, (index - 1) as u32));
        }
        next = next.max(index + 1);
    }
    ranges
}

/// `rec-<unix millis>-<8 random hex chars>`
fn new_session_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("rec-{}-{}", now.timestamp_millis(), &suffix[..8])
}

// Fixed-width UTC timestamps sort lexicographically in time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("bad timestamp {raw:?}: {e}")))
}

fn to_u64(value: i64, field: &str) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("negative {field}: {value}")))
}

/// Raw column values, converted outside the rusqlite row closure so that
/// conversion failures surface as `InvalidRecord`.
struct SessionRow {
    id: String,
    owner_id: String,
    name: String,
    started_at: String,
    last_updated_at: String,
    mime_type: String,
    chunk_count: i64,
    total_size: i64,
    status: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            started_at: row.get(3)?,
            last_updated_at: row.get(4)?,
            mime_type: row.get(5)?,
            chunk_count: row.get(6)?,
            total_size: row.get(7)?,
            status: row.get(8)?,
        })
    }

    fn into_session(self) -> StoreResult<RecordingSession> {
        let status = self
            .status
            .parse::<SessionStatus>()
            .map_err(StoreError::InvalidRecord)?;

        Ok(RecordingSession {
            started_at: parse_timestamp(&self.started_at)?,
            last_updated_at: parse_timestamp(&self.last_updated_at)?,
            chunk_count: to_u64(self.chunk_count, "chunk_count")?,
            total_size: to_u64(self.total_size, "total_size")?,
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            mime_type: self.mime_type,
            status,
        })
    }
}

fn fetch_session(conn: &Connection, id: &str) -> StoreResult<Option<RecordingSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    conn.query_row(&sql, params![id], SessionRow::from_row)
        .optional()?
        .map(SessionRow::into_session)
        .transpose()
}

fn query_sessions(conn: &Connection, sql: &str) -> StoreResult<Vec<RecordingSession>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], SessionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SessionRow::into_session).collect()
}
