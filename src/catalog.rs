//! Base catalog loading and dedup.
//!
//! Library tracks (tracks on saved albums) and liked-only tracks are read
//! from the source database, re-keyed by canonical id, and collapsed to one
//! representative per canonical id.

use anyhow::{Context, Result};
use rusqlite::{Connection, Row};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use crate::canonical::{select_representative, Canonicalizer};
use crate::models::{CatalogEntry, Provenance, RebuildStats, Timestamp};

const LIBRARY_SQL: &str = "
SELECT
    t.id,
    t.name,
    COALESCE(a.artist, t.artist, lt.track_artist),
    COALESCE(a.artist_id, lt.artist_id),
    t.album_id,
    a.name,
    a.album_type,
    a.album_image_url,
    a.release_date,
    ar.genres,
    ar.image_url,
    t.track_number,
    COALESCE(t.disc_number, 1),
    t.duration_ms,
    COALESCE(lt.popularity, t.popularity),
    t.added_at,
    lt.liked_at,
    ta.is_playable,
    EXISTS (SELECT 1 FROM excluded_tracks et WHERE et.track_id = t.id)
FROM tracks t
JOIN albums a ON t.album_id = a.id
LEFT JOIN liked_tracks lt ON lt.track_id = t.id
LEFT JOIN track_availability ta ON ta.track_id = t.id
LEFT JOIN artists ar ON ar.id = COALESCE(a.artist_id, lt.artist_id)
WHERE a.is_saved = 1
ORDER BY t.id";

const LIKED_ONLY_SQL: &str = "
SELECT
    lt.track_id,
    lt.track_name,
    lt.track_artist,
    lt.artist_id,
    lt.album_id,
    NULL,
    NULL,
    NULL,
    NULL,
    ar.genres,
    ar.image_url,
    NULL,
    1,
    lt.duration_ms,
    lt.popularity,
    lt.added_at,
    lt.liked_at,
    ta.is_playable,
    EXISTS (SELECT 1 FROM excluded_tracks et WHERE et.track_id = lt.track_id)
FROM liked_tracks lt
LEFT JOIN track_availability ta ON ta.track_id = lt.track_id
LEFT JOIN artists ar ON ar.id = lt.artist_id
WHERE NOT EXISTS (
    SELECT 1 FROM tracks t
    JOIN albums a ON t.album_id = a.id
    WHERE t.id = lt.track_id AND a.is_saved = 1
)
ORDER BY lt.track_id";

/// Map a row of `LIBRARY_SQL` / `LIKED_ONLY_SQL` (same column layout).
fn entry_from_row(row: &Row<'_>, provenance: Provenance) -> rusqlite::Result<CatalogEntry> {
    let raw_id: String = row.get(0)?;
    let liked_at: Option<Timestamp> = row.get(16)?;
    Ok(CatalogEntry {
        track_id: raw_id.clone(),
        source_track_id: raw_id,
        name: row.get(1)?,
        artist: row.get(2)?,
        artist_id: row.get(3)?,
        album_id: row.get(4)?,
        album_name: row.get(5)?,
        album_type: row.get(6)?,
        album_image_url: row.get(7)?,
        release_date: row.get(8)?,
        genres: row.get(9)?,
        artist_image: row.get(10)?,
        track_number: row.get(11)?,
        disc_number: row.get(12)?,
        duration_ms: row.get(13)?,
        popularity: row.get(14)?,
        provenance,
        added_at: row.get(15)?,
        is_liked: provenance == Provenance::LikedOnly || liked_at.is_some(),
        liked_at,
        is_playable: row.get(17)?,
        is_excluded: row.get(18)?,
    })
}

fn read_entries(conn: &Connection, sql: &str, provenance: Provenance) -> Result<Vec<CatalogEntry>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("Failed to query {} catalog", provenance.as_str()))?;
    let entries = stmt
        .query_map([], |row| entry_from_row(row, provenance))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read {} catalog", provenance.as_str()))?;
    Ok(entries)
}

/// Read library and liked-only rows as they are stored (raw ids).
pub fn load_raw_entries(conn: &Connection) -> Result<Vec<CatalogEntry>> {
    let mut entries = read_entries(conn, LIBRARY_SQL, Provenance::Library)?;
    entries.extend(read_entries(conn, LIKED_ONLY_SQL, Provenance::LikedOnly)?);
    Ok(entries)
}

/// Collapse raw rows onto canonical ids, one representative each, ordered by
/// canonical id. `excluded` holds canonical ids, so an exclusion listed under
/// either the alias or the canonical id applies to the merged row.
pub fn dedup_entries(
    entries: Vec<CatalogEntry>,
    canonicalizer: &Canonicalizer<'_>,
    excluded: &FxHashSet<String>,
) -> Vec<CatalogEntry> {
    let mut groups: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();
    for entry in entries {
        let canonical = canonicalizer.canonicalize(&entry.source_track_id).to_string();
        groups.entry(canonical).or_default().push(entry);
    }

    groups
        .into_iter()
        .filter_map(|(canonical, rows)| {
            let mut entry = select_representative(&canonical, rows)?;
            entry.is_excluded |= excluded.contains(&canonical);
            Some(entry)
        })
        .collect()
}

/// Durations for the `duration_ms_used` fallback chain, keyed by canonical id.
#[derive(Debug, Default, Clone)]
pub struct DurationIndex {
    library: FxHashMap<String, i64>,
    liked: FxHashMap<String, i64>,
}

impl DurationIndex {
    pub fn new(library: FxHashMap<String, i64>, liked: FxHashMap<String, i64>) -> Self {
        Self { library, liked }
    }

    pub fn load(conn: &Connection, canonicalizer: &Canonicalizer<'_>) -> Result<Self> {
        let library = read_durations(
            conn,
            "SELECT id, duration_ms FROM tracks WHERE id IS NOT NULL AND duration_ms IS NOT NULL ORDER BY id",
            canonicalizer,
        )
        .context("Failed to read track durations")?;
        let liked = read_durations(
            conn,
            "SELECT track_id, duration_ms FROM liked_tracks WHERE track_id IS NOT NULL AND duration_ms IS NOT NULL ORDER BY track_id",
            canonicalizer,
        )
        .context("Failed to read liked track durations")?;
        Ok(Self { library, liked })
    }

    /// First known of: library duration, liked duration, the event's own.
    pub fn resolve(&self, track_id: &str, event_duration_ms: Option<i64>) -> Option<i64> {
        self.library
            .get(track_id)
            .or_else(|| self.liked.get(track_id))
            .copied()
            .or(event_duration_ms)
    }
}

/// Rows arrive ordered by raw id; the first row per canonical id wins unless
/// a row whose id is the canonical id itself shows up.
fn read_durations(
    conn: &Connection,
    sql: &str,
    canonicalizer: &Canonicalizer<'_>,
) -> Result<FxHashMap<String, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut durations: FxHashMap<String, i64> = FxHashMap::default();
    let mut exact: FxHashSet<String> = FxHashSet::default();

    while let Some(row) = rows.next()? {
        let raw_id: String = row.get(0)?;
        let duration_ms: i64 = row.get(1)?;
        let canonical = canonicalizer.canonicalize(&raw_id);
        if canonical == raw_id {
            exact.insert(raw_id.clone());
            durations.insert(raw_id, duration_ms);
        } else if !exact.contains(canonical) {
            durations.entry(canonical.to_string()).or_insert(duration_ms);
        }
    }
    Ok(durations)
}

/// Canonical ids listed in `excluded_tracks`.
pub fn load_excluded(conn: &Connection, canonicalizer: &Canonicalizer<'_>) -> Result<FxHashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT track_id FROM excluded_tracks WHERE track_id IS NOT NULL")
        .context("Failed to query excluded_tracks")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids
        .iter()
        .map(|id| canonicalizer.canonicalize(id).to_string())
        .collect())
}

/// Deduplicated base catalog plus the lookups later phases need.
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    pub durations: DurationIndex,
    pub excluded: FxHashSet<String>,
}

impl Catalog {
    pub fn load(conn: &Connection, canonicalizer: &Canonicalizer<'_>, stats: &mut RebuildStats) -> Result<Self> {
        let raw = load_raw_entries(conn)?;
        stats.catalog_rows_raw = raw.len();

        let excluded = load_excluded(conn, canonicalizer)?;
        let entries = dedup_entries(raw, canonicalizer, &excluded);
        stats.catalog_rows_deduped = entries.len();

        Ok(Self {
            entries,
            durations: DurationIndex::load(conn, canonicalizer)?,
            excluded,
        })
    }

    pub fn ids(&self) -> FxHashSet<&str> {
        self.entries.iter().map(|e| e.track_id.as_str()).collect()
    }
}
