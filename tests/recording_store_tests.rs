// Integration tests for the durable recording store
//
// Each test opens a fresh SQLite database in a temporary directory and
// exercises the store through its public async API.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use loqa_recordings::store::{RecordingStore, SessionStatus, StoreError, SCHEMA_VERSION};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn temp_store() -> Result<(TempDir, RecordingStore)> {
    let temp_dir = TempDir::new()?;
    let store = RecordingStore::new(temp_dir.path().join("recordings.db"));
    Ok((temp_dir, store))
}

fn bytes(len: usize, fill: u8) -> Vec<u8> {
    vec![fill; len]
}

#[tokio::test]
async fn test_start_session_creates_empty_recording_session() -> Result<()> {
    let (_dir, store) = temp_store()?;

    let id = store.start_session("case-42", "Hearing", "audio/webm").await?;
    let session = store.get_session(&id).await?.expect("session should exist");

    assert!(id.starts_with("rec-"));
    assert_eq!(session.id, id);
    assert_eq!(session.owner_id, "case-42");
    assert_eq!(session.name, "Hearing");
    assert_eq!(session.mime_type, "audio/webm");
    assert_eq!(session.status, SessionStatus::Recording);
    assert_eq!(session.chunk_count, 0);
    assert_eq!(session.total_size, 0);
    assert_eq!(session.started_at, session.last_updated_at);

    Ok(())
}

#[tokio::test]
async fn test_session_ids_are_unique() -> Result<()> {
    let (_dir, store) = temp_store()?;

    let mut ids = HashSet::new();
    for i in 0..20 {
        ids.insert(store.start_session("case", &format!("take {i}"), "audio/webm").await?);
    }

    assert_eq!(ids.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_reassembly_is_independent_of_write_order() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let chunks = [bytes(10, 0xA0), bytes(20, 0xB1), bytes(30, 0xC2)];

    let in_order = store.start_session("case", "in order", "audio/webm").await?;
    for index in [0u32, 1, 2] {
        store
            .save_chunk(&in_order, index, chunks[index as usize].clone())
            .await?;
    }

    let shuffled = store.start_session("case", "shuffled", "audio/webm").await?;
    for index in [2u32, 0, 1] {
        store
            .save_chunk(&shuffled, index, chunks[index as usize].clone())
            .await?;
    }

    let a = store.assemble_recording(&in_order).await?.expect("recording");
    let b = store.assemble_recording(&shuffled).await?.expect("recording");

    assert_eq!(a.data, b.data);
    assert_eq!(a.data, chunks.concat());
    Ok(())
}

#[tokio::test]
async fn test_aggregates_track_saved_chunks() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let id = store.start_session("case", "aggregates", "audio/ogg").await?;
    let sizes = [512usize, 1024, 77, 4096];

    for (index, size) in sizes.iter().enumerate() {
        store.save_chunk(&id, index as u32, bytes(*size, 1)).await?;
    }

    let session = store.get_session(&id).await?.expect("session");
    assert_eq!(session.chunk_count, sizes.len() as u64);
    assert_eq!(session.total_size, sizes.iter().sum::<usize>() as u64);
    assert!(session.last_updated_at >= session.started_at);

    // A scan of the stored chunks agrees with the running aggregates.
    let report = store.inspect_session(&id).await?.expect("report");
    assert!(report.is_consistent(), "unexpected drift: {report:?}");
    assert_eq!(report.scanned_chunks, session.chunk_count);
    assert_eq!(report.scanned_size, session.total_size);
    assert_eq!(report.highest_index, Some(3));

    let assembled = store.assemble_recording(&id).await?.expect("recording");
    assert_eq!(assembled.size() as u64, session.total_size);

    Ok(())
}

#[tokio::test]
async fn test_overwriting_an_index_replaces_data_but_counts_both_sizes() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let id = store.start_session("case", "overwrite", "audio/webm").await?;

    store.save_chunk(&id, 0, bytes(100, 0xAA)).await?;
    store.save_chunk(&id, 0, bytes(40, 0xBB)).await?;

    let chunks = store.get_chunks(&id).await?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].index, 0);
    assert_eq!(chunks[0].data, bytes(40, 0xBB));

    let session = store.get_session(&id).await?.expect("session");
    assert_eq!(session.chunk_count, 1);
    assert_eq!(session.total_size, 140);

    // The drift is visible to diagnostics.
    let report = store.inspect_session(&id).await?.expect("report");
    assert_eq!(report.scanned_size, 40);
    assert_eq!(report.stored_total_size, 140);
    assert!(!report.is_consistent());

    Ok(())
}

#[tokio::test]
async fn test_gaps_are_skipped_during_reassembly() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let id = store.start_session("case", "gap", "audio/webm").await?;

    store.save_chunk(&id, 2, vec![2, 2]).await?;
    store.save_chunk(&id, 0, vec![0, 0, 0]).await?;

    let recording = store.assemble_recording(&id).await?.expect("recording");
    assert_eq!(recording.data, vec![0, 0, 0, 2, 2]);

    let session = store.get_session(&id).await?.expect("session");
    assert_eq!(session.chunk_count, 3);

    let report = store.inspect_session(&id).await?.expect("report");
    assert_eq!(report.missing_ranges, vec![(1, 1)]);
    assert_eq!(report.missing_count, 1);
    assert_eq!(report.scanned_chunks, 2);

    Ok(())
}

#[tokio::test]
async fn test_interrupted_sessions_are_recording_or_paused() -> Result<()> {
    let (_dir, store) = temp_store()?;

    let recording = store.start_session("case", "recording", "audio/webm").await?;
    let paused = store.start_session("case", "paused", "audio/webm").await?;
    let completed = store.start_session("case", "completed", "audio/webm").await?;
    let interrupted = store.start_session("case", "interrupted", "audio/webm").await?;

    store.update_session_status(&paused, SessionStatus::Paused).await?;
    store.update_session_status(&completed, SessionStatus::Completed).await?;
    store
        .update_session_status(&interrupted, SessionStatus::Interrupted)
        .await?;

    let found: HashSet<String> = store
        .get_interrupted_sessions()
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();

    assert_eq!(found, HashSet::from([recording, paused]));

    for session in store.list_sessions().await? {
        assert_eq!(
            found.contains(&session.id),
            session.status.is_resumable(),
            "{} ({})",
            session.id,
            session.status
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_inspect_reports_huge_gap_as_one_range() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let id = store.start_session("case", "sparse", "audio/webm").await?;

    store.save_chunk(&id, 0, vec![1]).await?;
    store.save_chunk(&id, u32::MAX, vec![2]).await?;

    let session = store.get_session(&id).await?.expect("session");
    assert_eq!(session.chunk_count, u64::from(u32::MAX) + 1);

    let report = store.inspect_session(&id).await?.expect("report");
    assert_eq!(report.missing_ranges, vec![(1, u32::MAX - 1)]);
    assert_eq!(report.missing_count, u64::from(u32::MAX) - 1);
    assert_eq!(report.highest_index, Some(u32::MAX));
    assert!(!report.is_consistent());

    Ok(())
}

#[tokio::test]
async fn test_status_updates_are_unrestricted() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let id = store.start_session("case", "permissive", "audio/webm").await?;

    store.update_session_status(&id, SessionStatus::Completed).await?;
    store.update_session_status(&id, SessionStatus::Recording).await?;

    let session = store.get_session(&id).await?.expect("session");
    assert_eq!(session.status, SessionStatus::Recording);
    assert!(session.last_updated_at >= session.started_at);

    // Unknown ids are ignored rather than rejected.
    store
        .update_session_status("rec-0-missing", SessionStatus::Paused)
        .await?;
    assert!(store.get_session("rec-0-missing").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_cleanup_only_removes_old_completed_sessions() -> Result<()> {
    let (_dir, store) = temp_store()?;

    let completed = store.start_session("case", "done", "audio/webm").await?;
    store.save_chunk(&completed, 0, bytes(64, 9)).await?;
    store.update_session_status(&completed, SessionStatus::Completed).await?;

    let recording = store.start_session("case", "live", "audio/webm").await?;
    let paused = store.start_session("case", "paused", "audio/webm").await?;
    store.update_session_status(&paused, SessionStatus::Paused).await?;
    let interrupted = store.start_session("case", "broken", "audio/webm").await?;
    store
        .update_session_status(&interrupted, SessionStatus::Interrupted)
        .await?;

    // Fresh completed sessions survive a one-hour max age.
    assert_eq!(store.cleanup_old_sessions(Duration::from_secs(3600)).await?, 0);
    assert!(store.get_session(&completed).await?.is_some());

    // Two hours later only the completed one qualifies.
    let later = Utc::now() + ChronoDuration::hours(2);
    let deleted = store
        .cleanup_sessions_before(later - ChronoDuration::hours(1))
        .await?;

    assert_eq!(deleted, 1);
    assert!(store.get_session(&completed).await?.is_none());
    assert!(store.get_chunks(&completed).await?.is_empty());
    for id in [&recording, &paused, &interrupted] {
        assert!(store.get_session(id).await?.is_some(), "{id} should survive");
    }

    Ok(())
}

#[tokio::test]
async fn test_delete_session_cascades_to_chunks() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let id = store.start_session("case", "delete me", "audio/webm").await?;
    let keep = store.start_session("case", "keep me", "audio/webm").await?;

    for index in 0..5 {
        store.save_chunk(&id, index, bytes(10, index as u8)).await?;
    }
    store.save_chunk(&keep, 0, bytes(10, 7)).await?;

    assert!(store.delete_session(&id).await?);

    assert!(store.get_session(&id).await?.is_none());
    assert!(store.get_chunks(&id).await?.is_empty());
    assert_eq!(store.get_chunks(&keep).await?.len(), 1);

    // Deleting again is a no-op.
    assert!(!store.delete_session(&id).await?);

    Ok(())
}

#[tokio::test]
async fn test_unknown_sessions_return_none() -> Result<()> {
    let (_dir, store) = temp_store()?;

    assert!(store.get_session("rec-0-unknown").await?.is_none());
    assert!(store.assemble_recording("rec-0-unknown").await?.is_none());
    assert!(store.inspect_session("rec-0-unknown").await?.is_none());
    assert!(!store.delete_session("rec-0-unknown").await?);

    Ok(())
}

#[tokio::test]
async fn test_orphan_chunks_are_stored_without_aggregates() -> Result<()> {
    let (_dir, store) = temp_store()?;

    store.save_chunk("rec-0-orphan", 0, bytes(32, 1)).await?;

    assert!(store.get_session("rec-0-orphan").await?.is_none());
    assert_eq!(store.get_chunks("rec-0-orphan").await?.len(), 1);
    assert_eq!(store.get_storage_size().await?, 0);

    // Deleting the unknown session still clears its chunks.
    assert!(!store.delete_session("rec-0-orphan").await?);
    assert!(store.get_chunks("rec-0-orphan").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_storage_size_sums_all_sessions() -> Result<()> {
    let (_dir, store) = temp_store()?;
    assert_eq!(store.get_storage_size().await?, 0);

    let a = store.start_session("case", "a", "audio/webm").await?;
    let b = store.start_session("case", "b", "audio/webm").await?;
    store.save_chunk(&a, 0, bytes(300, 1)).await?;
    store.save_chunk(&b, 0, bytes(200, 2)).await?;
    store.save_chunk(&b, 1, bytes(50, 3)).await?;
    store.update_session_status(&a, SessionStatus::Completed).await?;

    assert_eq!(store.get_storage_size().await?, 550);
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_recording_lifecycle() -> Result<()> {
    let (_dir, store) = temp_store()?;

    let id = store.start_session("course-7", "Lecture", "audio/webm").await?;
    store.save_chunk(&id, 0, bytes(1000, 0x10)).await?;
    store.save_chunk(&id, 1, bytes(1500, 0x11)).await?;
    store.save_chunk(&id, 2, bytes(1200, 0x12)).await?;
    store.update_session_status(&id, SessionStatus::Completed).await?;

    let recording = store.assemble_recording(&id).await?.expect("recording");
    assert_eq!(recording.size(), 3700);
    assert_eq!(recording.mime_type, "audio/webm");
    assert_eq!(&recording.data[..1000], &bytes(1000, 0x10)[..]);
    assert_eq!(&recording.data[2500..], &bytes(1200, 0x12)[..]);

    assert!(store.get_storage_size().await? >= 3700);

    let deleted = store.cleanup_old_sessions(Duration::ZERO).await?;
    assert_eq!(deleted, 1);
    assert!(store.get_session(&id).await?.is_none());
    assert!(store.get_chunks(&id).await?.is_empty());
    assert!(store.assemble_recording(&id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_concurrent_first_use_opens_database_once() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let store = Arc::new(store);
    assert_eq!(store.open_count(), 0);

    let lookups = (0..16).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.get_session("rec-0-none").await })
    });

    for result in futures::future::join_all(lookups).await {
        assert!(result??.is_none());
    }

    assert_eq!(store.open_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writes_to_different_sessions() -> Result<()> {
    let (_dir, store) = temp_store()?;
    let store = Arc::new(store);

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(store.start_session("case", &format!("s{i}"), "audio/webm").await?);
    }

    let writers = ids.iter().cloned().map(|id| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for index in 0..25u32 {
                store.save_chunk(&id, index, bytes(100, index as u8)).await?;
            }
            Ok::<_, StoreError>(())
        })
    });

    for result in futures::future::join_all(writers).await {
        result??;
    }

    for id in &ids {
        let session = store.get_session(id).await?.expect("session");
        assert_eq!(session.chunk_count, 25);
        assert_eq!(session.total_size, 2500);
    }

    Ok(())
}

#[tokio::test]
async fn test_data_survives_reopening_the_store() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("nested").join("recordings.db");

    let id = {
        let store = RecordingStore::new(&db_path);
        let id = store.start_session("case", "crash", "audio/webm").await?;
        store.save_chunk(&id, 0, bytes(10, 1)).await?;
        store.save_chunk(&id, 1, bytes(10, 2)).await?;
        id
    };

    // A new handle on the same file sees the unfinished session.
    let reopened = RecordingStore::new(&db_path);
    let unfinished = reopened.get_interrupted_sessions().await?;
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].id, id);
    assert_eq!(unfinished[0].chunk_count, 2);

    let recording = reopened.assemble_recording(&id).await?.expect("recording");
    assert_eq!(recording.size(), 20);

    Ok(())
}

#[tokio::test]
async fn test_unopenable_store_reports_storage_error_and_retries() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory")?;

    let store = RecordingStore::new(blocker.join("recordings.db"));

    for _ in 0..2 {
        let err = store
            .start_session("case", "doomed", "audio/webm")
            .await
            .expect_err("open should fail");
        assert!(err.is_retryable());
    }
    assert_eq!(store.open_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_newer_schema_version_is_refused() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("recordings.db");
    {
        let conn = rusqlite::Connection::open(&db_path)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)?;
    }

    let store = RecordingStore::new(&db_path);
    let err = store
        .get_session("rec-0-any")
        .await
        .expect_err("newer schema should be refused");

    assert!(matches!(err, StoreError::UnsupportedSchema { found, .. } if found == SCHEMA_VERSION + 1));
    assert!(!err.is_retryable());
    Ok(())
}
