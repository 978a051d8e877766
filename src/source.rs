//! Event feeds and their merge into one canonicalized stream.
//!
//! Every feed implements [`EventSource`]. [`merge_sources`] only sees the
//! trait, so adding a feed kind never touches the merge or anything after it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use crate::canonical::Canonicalizer;
use crate::config::FeedConfig;
use crate::models::{FeedStats, PlayEvent, RawPlayEvent, RebuildStats};

/// Events read from one feed, plus what ingestion discarded.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub events: Vec<RawPlayEvent>,
    pub dropped_missing_played_at: usize,
    pub dropped_missing_track_id: usize,
}

impl SourceBatch {
    /// Apply the ingestion filter to one row's fields.
    fn push(&mut self, row: FeedRow) {
        let Some(played_at) = row.played_at else {
            self.dropped_missing_played_at += 1;
            return;
        };
        let Some(track_id) = row.track_id.filter(|id| !id.trim().is_empty()) else {
            self.dropped_missing_track_id += 1;
            return;
        };
        self.events.push(RawPlayEvent {
            source: row.source,
            source_row_id: row.source_row_id,
            track_id,
            track_name: row.track_name,
            artist_id: row.artist_id,
            artist_name: row.artist_name,
            album_id: row.album_id,
            album_name: row.album_name,
            album_type: row.album_type,
            duration_ms: row.duration_ms,
            played_at,
        });
    }
}

/// A feed row before the ingestion filter.
struct FeedRow {
    source: String,
    source_row_id: String,
    track_id: Option<String>,
    track_name: Option<String>,
    artist_id: Option<String>,
    artist_name: Option<String>,
    album_id: Option<String>,
    album_name: Option<String>,
    album_type: Option<String>,
    duration_ms: Option<i64>,
    played_at: Option<DateTime<Utc>>,
}

/// Common contract for play event feeds.
pub trait EventSource: Send + Sync {
    /// Tag stamped on every event from this feed.
    fn tag(&self) -> &str;

    /// Read the whole feed. Failing here aborts the pass.
    fn read_events(&self, conn: &Connection) -> Result<SourceBatch>;
}

// ============================================================================
// SQLite table feed
// ============================================================================

/// Feed backed by a table in the source database.
pub struct TableFeed {
    tag: String,
    table: String,
}

impl TableFeed {
    /// `table` must be a plain identifier (checked by `EngineConfig::validate`).
    pub fn new(tag: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            table: table.into(),
        }
    }
}

impl EventSource for TableFeed {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn read_events(&self, conn: &Connection) -> Result<SourceBatch> {
        let sql = format!(
            "SELECT COALESCE(CAST(id AS TEXT), CAST(rowid AS TEXT)),
                    track_id, track_name, artist_id, artist_name,
                    album_id, album_name, album_type, duration_ms, played_at
             FROM \"{}\"",
            self.table
        );
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("Failed to query feed table '{}'", self.table))?;

        let mut batch = SourceBatch::default();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            batch.push(FeedRow {
                source: self.tag.clone(),
                source_row_id: row.get(0)?,
                track_id: row.get(1)?,
                track_name: row.get(2)?,
                artist_id: row.get(3)?,
                artist_name: row.get(4)?,
                album_id: row.get(5)?,
                album_name: row.get(6)?,
                album_type: row.get(7)?,
                duration_ms: row.get(8)?,
                played_at: row.get(9)?,
            });
        }
        Ok(batch)
    }
}

// ============================================================================
// JSON Lines export feed
// ============================================================================

#[derive(Deserialize)]
struct JsonPlayRow {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    track_id: Option<String>,
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    artist_id: Option<String>,
    #[serde(default)]
    artist_name: Option<String>,
    #[serde(default)]
    album_id: Option<String>,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    album_type: Option<String>,
    #[serde(default)]
    duration_ms: Option<i64>,
    #[serde(default)]
    played_at: Option<DateTime<Utc>>,
}

/// Feed backed by a JSON Lines file, one play object per line. Rows without
/// an `id` are identified by their 1-based line number.
pub struct JsonLinesFeed {
    tag: String,
    path: PathBuf,
}

impl JsonLinesFeed {
    pub fn new(tag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            path: path.into(),
        }
    }
}

impl EventSource for JsonLinesFeed {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn read_events(&self, _conn: &Connection) -> Result<SourceBatch> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open feed file {}", self.path.display()))?;

        let mut batch = SourceBatch::default();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let row: JsonPlayRow = serde_json::from_str(&line).with_context(|| {
                format!("Malformed play at {}:{}", self.path.display(), line_no)
            })?;

            let source_row_id = match row.id {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Null) | None => line_no.to_string(),
                Some(other) => other.to_string(),
            };
            batch.push(FeedRow {
                source: self.tag.clone(),
                source_row_id,
                track_id: row.track_id,
                track_name: row.track_name,
                artist_id: row.artist_id,
                artist_name: row.artist_name,
                album_id: row.album_id,
                album_name: row.album_name,
                album_type: row.album_type,
                duration_ms: row.duration_ms,
                played_at: row.played_at,
            });
        }
        Ok(batch)
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Instantiate the configured feeds.
pub fn sources_from_config(feeds: &[FeedConfig]) -> Vec<Box<dyn EventSource>> {
    feeds
        .iter()
        .map(|feed| -> Box<dyn EventSource> {
            match feed {
                FeedConfig::Table { tag, table } => Box::new(TableFeed::new(tag, table)),
                FeedConfig::JsonLines { tag, path } => Box::new(JsonLinesFeed::new(tag, path)),
            }
        })
        .collect()
}

/// Union all feeds into one stream in chronological order, each event's
/// track id passed through the canonicalizer.
pub fn merge_sources(
    conn: &Connection,
    sources: &[Box<dyn EventSource>],
    canonicalizer: &Canonicalizer<'_>,
    stats: &mut RebuildStats,
) -> Result<Vec<PlayEvent>> {
    let mut merged: Vec<PlayEvent> = Vec::new();

    for source in sources {
        let batch = source
            .read_events(conn)
            .with_context(|| format!("Failed to read feed '{}'", source.tag()))?;

        stats.feeds.push(FeedStats {
            tag: source.tag().to_string(),
            events_read: batch.events.len(),
            dropped_missing_played_at: batch.dropped_missing_played_at,
            dropped_missing_track_id: batch.dropped_missing_track_id,
        });
        tracing::info!(
            feed = source.tag(),
            events = batch.events.len(),
            dropped_missing_played_at = batch.dropped_missing_played_at,
            dropped_missing_track_id = batch.dropped_missing_track_id,
            "feed read"
        );

        merged.extend(batch.events.into_iter().map(|raw| {
            let canonical_id = canonicalizer.canonicalize(&raw.track_id).to_string();
            PlayEvent { raw, canonical_id }
        }));
    }

    merged.par_sort_by(|a, b| a.raw.chronological_cmp(&b.raw));

    stats.total_events = merged.len();
    stats.alias_resolved_events = merged
        .iter()
        .filter(|e| e.canonical_id != e.raw.track_id)
        .count();

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::EquivalenceOverrides;
    use crate::schema::SOURCE_SCHEMA;
    use std::io::Write;

    fn source_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SOURCE_SCHEMA).unwrap();
        conn
    }

    #[test]
    fn test_table_feed_drops_rows_without_played_at_or_track() {
        let conn = source_db();
        conn.execute_batch(
            "INSERT INTO plays (id, track_id, track_name, duration_ms, played_at) VALUES
                (1, 'A', 'Song A', 200000, '2024-01-01T00:00:00Z'),
                (2, 'A', 'Song A', 200000, NULL),
                (3, NULL, 'Ghost', 1000, '2024-01-01T00:05:00Z');",
        )
        .unwrap();

        let batch = TableFeed::new("plays", "plays").read_events(&conn).unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.dropped_missing_played_at, 1);
        assert_eq!(batch.dropped_missing_track_id, 1);
        assert_eq!(batch.events[0].source, "plays");
        assert_eq!(batch.events[0].source_row_id, "1");
        assert_eq!(batch.events[0].duration_ms, Some(200000));
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(TableFeed::new("plays", "plays").read_events(&conn).is_err());
    }

    #[test]
    fn test_json_lines_feed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"id": 7, "track_id": "B", "track_name": "Song", "artist_name": "Band", "duration_ms": 1000, "played_at": "2024-02-01T10:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"track_id": "C", "played_at": "2024-02-01T11:00:00Z"}}"#).unwrap();
        writeln!(file, r#"{{"track_id": "D"}}"#).unwrap();

        let conn = Connection::open_in_memory().unwrap();
        let batch = JsonLinesFeed::new("export", file.path()).read_events(&conn).unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].source_row_id, "7");
        assert_eq!(batch.events[1].source_row_id, "3");
        assert_eq!(batch.dropped_missing_played_at, 1);
    }

    #[test]
    fn test_json_lines_feed_rejects_malformed_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let conn = Connection::open_in_memory().unwrap();
        let err = JsonLinesFeed::new("export", file.path())
            .read_events(&conn)
            .unwrap_err();
        assert!(err.to_string().contains("Malformed play"));
    }

    #[test]
    fn test_merge_canonicalizes_and_orders() {
        let conn = source_db();
        conn.execute_batch(
            "INSERT INTO plays (id, track_id, played_at) VALUES
                (1, 'alias', '2024-01-01T00:10:00Z');
             INSERT INTO spotify_play_history (id, track_id, played_at) VALUES
                (1, 'B', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        let overrides =
            EquivalenceOverrides::from_pairs(vec![("alias".to_string(), "A".to_string())]).unwrap();
        let canon = Canonicalizer::new(&overrides);
        let sources = sources_from_config(&[
            FeedConfig::table("plays"),
            FeedConfig::table("spotify_play_history"),
        ]);
        let mut stats = RebuildStats::default();

        let merged = merge_sources(&conn, &sources, &canon, &mut stats).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].canonical_id, "B");
        assert_eq!(merged[1].canonical_id, "A");
        assert_eq!(merged[1].raw.track_id, "alias");
        assert_eq!(stats.alias_resolved_events, 1);
        assert_eq!(stats.feeds.len(), 2);
    }
}
