//! Read-only selectors over a published unified dataset.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, Row};
use std::path::Path;

pub const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub track_id: String,
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album_id: Option<String>,
    pub track_number: Option<i64>,
    pub provenance: String,
    pub play_count: i64,
    pub last_played_at: Option<String>,
}

const COLUMNS: &str =
    "track_id, name, artist, album_id, track_number, provenance, play_count, last_played_at";

// Known-unplayable rows are left out; unknown availability is kept.
const PLAYABLE: &str = "is_excluded = 0 AND (is_playable IS NULL OR is_playable = 1)";

fn report_row(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        track_id: row.get(0)?,
        name: row.get(1)?,
        artist: row.get(2)?,
        album_id: row.get(3)?,
        track_number: row.get(4)?,
        provenance: row.get(5)?,
        play_count: row.get(6)?,
        last_played_at: row.get(7)?,
    })
}

pub fn open_unified(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_context(|| format!("Failed to open unified dataset {:?}", path))
}

fn run(conn: &Connection, sql: &str, limit: usize) -> Result<Vec<ReportRow>> {
    let mut stmt = conn.prepare(sql).context("Failed to prepare report query")?;
    let rows = stmt
        .query_map([limit as i64], report_row)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read report rows")?;
    Ok(rows)
}

/// Highest play counts first, ties by track id.
pub fn most_played(conn: &Connection, limit: usize) -> Result<Vec<ReportRow>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM unified_tracks
         WHERE {PLAYABLE}
         ORDER BY play_count DESC, track_id
         LIMIT ?1"
    );
    run(conn, &sql, limit)
}

/// Unplayed tracks in album order, tracks without a number last.
pub fn never_played(conn: &Connection, limit: usize) -> Result<Vec<ReportRow>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM unified_tracks
         WHERE {PLAYABLE} AND play_count = 0
         ORDER BY album_id, track_number IS NULL, track_number, track_id
         LIMIT ?1"
    );
    run(conn, &sql, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UNIFIED_SCHEMA;

    fn dataset() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(UNIFIED_SCHEMA).unwrap();
        let rows: [(&str, &str, Option<i64>, Option<bool>, bool, i64); 6] = [
            ("A", "al1", Some(2), Some(true), false, 5),
            ("B", "al1", Some(1), None, false, 5),
            ("C", "al1", None, None, false, 0),
            ("D", "al1", Some(3), None, false, 0),
            ("E", "al2", Some(1), Some(false), false, 9),
            ("F", "al0", Some(1), None, true, 0),
        ];
        for (id, album, number, playable, excluded, plays) in rows {
            conn.execute(
                "INSERT INTO unified_tracks (track_id, source_track_id, album_id, track_number,
                    disc_number, provenance, is_liked, is_playable, is_excluded,
                    library_play_count, resume_count, skip_count, fuzzy_play_count, play_count)
                 VALUES (?1, ?1, ?2, ?3, 1, 'library', 0, ?4, ?5, ?6, 0, 0, 0, ?6)",
                rusqlite::params![id, album, number, playable, excluded, plays],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn test_most_played_order_and_filters() {
        let conn = dataset();
        let ids: Vec<String> = most_played(&conn, DEFAULT_LIMIT)
            .unwrap()
            .into_iter()
            .map(|r| r.track_id)
            .collect();
        // E is known unplayable, F excluded.
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(most_played(&conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_never_played_album_order_nulls_last() {
        let conn = dataset();
        let ids: Vec<String> = never_played(&conn, DEFAULT_LIMIT)
            .unwrap()
            .into_iter()
            .map(|r| r.track_id)
            .collect();
        // F is excluded.
        assert_eq!(ids, vec!["D", "C"]);
    }
}
