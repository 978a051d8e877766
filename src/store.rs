//! Writing the unified dataset to a staging file and publishing it.
//!
//! The staging file sits next to the output so that publishing is a single
//! same-filesystem rename. Readers of the output only ever see the previous
//! file or the complete new one.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use rusqlite::{params, Connection};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::models::{Timestamp, UnifiedCatalogRow};
use crate::progress::{create_progress_bar, create_spinner, finish, log_progress};
use crate::schema::{UNIFIED_INDEXES, UNIFIED_SCHEMA};

const WRITE_BATCH_SIZE: usize = 10_000;

/// `<output>.staging`
pub fn staging_path(output: &Path) -> PathBuf {
    let mut name: OsString = output.as_os_str().to_owned();
    name.push(".staging");
    PathBuf::from(name)
}

/// Stored text form of every timestamp column.
pub fn format_timestamp(ts: Option<Timestamp>) -> Option<String> {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Build a fresh database at `path` holding `rows` in the given order.
/// Any leftover file at `path` is replaced.
pub fn write_unified(path: &Path, rows: &[UnifiedCatalogRow]) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove stale staging file {:?}", path))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("Failed to create staging database {:?}", path))?;

    // Throwaway file until published; durability comes from the rename.
    conn.execute_batch(
        "PRAGMA journal_mode = OFF;
         PRAGMA synchronous = OFF;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    conn.execute_batch(UNIFIED_SCHEMA)
        .context("Failed to create unified_tracks")?;

    insert_rows(&mut conn, rows)?;

    let spinner = create_spinner("Indexing and compacting");
    conn.execute_batch(UNIFIED_INDEXES)
        .context("Failed to create unified_tracks indexes")?;
    conn.execute_batch("VACUUM; ANALYZE;")
        .context("Failed to optimize staging database")?;
    finish(&spinner, "Staging database optimized".to_string());

    conn.close()
        .map_err(|(_, e)| e)
        .context("Failed to close staging database")?;
    Ok(())
}

fn insert_rows(conn: &mut Connection, rows: &[UnifiedCatalogRow]) -> Result<()> {
    let total = rows.len() as u64;
    let pb = create_progress_bar(total, "Writing unified rows");
    let mut written: u64 = 0;

    for chunk in rows.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO unified_tracks (
                    track_id, source_track_id, name, artist, artist_id, album_id, album_name,
                    album_type, album_image_url, release_date, genres, artist_image,
                    track_number, disc_number, duration_ms, popularity, provenance,
                    is_liked, is_playable, is_excluded, liked_at, source_added_at, added_at,
                    library_play_count, library_first_played_at, library_last_played_at,
                    resume_count, skip_count, fuzzy_play_count, fuzzy_first_played_at,
                    fuzzy_last_played_at, play_count, first_played_at, last_played_at
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32,
                    ?33, ?34
                 )",
            )?;

            for row in chunk {
                let e = &row.entry;
                let s = &row.stats;
                stmt.execute(params![
                    e.track_id,
                    e.source_track_id,
                    e.name,
                    e.artist,
                    e.artist_id,
                    e.album_id,
                    e.album_name,
                    e.album_type,
                    e.album_image_url,
                    e.release_date,
                    e.genres,
                    e.artist_image,
                    e.track_number,
                    e.disc_number,
                    e.duration_ms,
                    e.popularity,
                    e.provenance.as_str(),
                    e.is_liked,
                    e.is_playable,
                    e.is_excluded,
                    format_timestamp(e.liked_at),
                    format_timestamp(e.added_at),
                    format_timestamp(row.added_at),
                    s.library_play_count,
                    format_timestamp(s.library_first_played),
                    format_timestamp(s.library_last_played),
                    s.resume_count,
                    s.skip_count,
                    s.fuzzy_play_count,
                    format_timestamp(s.fuzzy_first_played),
                    format_timestamp(s.fuzzy_last_played),
                    s.play_count(),
                    format_timestamp(s.first_played()),
                    format_timestamp(s.last_played()),
                ])
                .with_context(|| format!("Failed to insert unified row '{}'", e.track_id))?;

                written += 1;
                pb.inc(1);
                log_progress("write", written, total, WRITE_BATCH_SIZE as u64);
            }
        }
        tx.commit()?;
    }

    finish(&pb, format!("Wrote {} unified rows", rows.len()));
    Ok(())
}

/// Atomically replace `output` with the finished staging file.
pub fn publish(staging: &Path, output: &Path) -> Result<()> {
    File::open(staging)
        .and_then(|f| f.sync_all())
        .with_context(|| format!("Failed to sync staging database {:?}", staging))?;
    fs::rename(staging, output)
        .with_context(|| format!("Failed to publish {:?} as {:?}", staging, output))?;
    tracing::info!(output = %output.display(), "published unified dataset");
    Ok(())
}

/// Remove a staging file left by a failed pass. Missing files are fine.
pub fn discard(staging: &Path) {
    match fs::remove_file(staging) {
        Ok(()) => tracing::info!(staging = %staging.display(), "discarded staging database"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(staging = %staging.display(), error = %e, "could not remove staging database"),
    }
}
