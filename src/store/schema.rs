use std::fs;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use super::error::{StoreError, StoreResult};

pub const SCHEMA_VERSION: i32 = 1;

// chunks has no foreign key to sessions: chunks for unknown sessions are kept.
const SCHEMA_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id              TEXT PRIMARY KEY NOT NULL,
        owner_id        TEXT NOT NULL,
        name            TEXT NOT NULL,
        started_at      TEXT NOT NULL,
        last_updated_at TEXT NOT NULL,
        mime_type       TEXT NOT NULL,
        chunk_count     INTEGER NOT NULL DEFAULT 0,
        total_size      INTEGER NOT NULL DEFAULT 0,
        status          TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS sessions_status_idx ON sessions(status);

    CREATE TABLE IF NOT EXISTS chunks (
        session_id  TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        data        BLOB NOT NULL,
        timestamp   TEXT NOT NULL,
        PRIMARY KEY (session_id, chunk_index)
    );
"#;

/// Open the database file, creating it and its parent directory if needed,
/// and bring the schema up to `SCHEMA_VERSION`.
pub fn open_database(db_path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let open_err = |source| StoreError::Open {
        path: db_path.to_path_buf(),
        source,
    };

    let mut conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(open_err)?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(open_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(open_err)?;
    conn.busy_timeout(Duration::from_secs(5)).map_err(open_err)?;

    migrate(&mut conn)?;

    info!("Recording store opened at {}", db_path.display());
    Ok(conn)
}

fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let user_version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    match user_version {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA_V1)?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
            info!("Recording store schema initialized (version {})", SCHEMA_VERSION);
            Ok(())
        }
        found => Err(StoreError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        }),
    }
}
