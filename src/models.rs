//! Core data models for the unified catalog rebuild.
//!
//! This module contains the struct definitions and enums shared across the
//! pipeline: raw play events, catalog entries, classification output,
//! per-track aggregates, the unified output row, and pass statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Timestamps are UTC throughout the pipeline.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// Events
// ============================================================================

/// One play as read from an event feed. Rows lacking `played_at` never become
/// a `RawPlayEvent`; they are dropped (and counted) at ingestion.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPlayEvent {
    pub source: String,        // Feed tag, e.g. "plays"
    pub source_row_id: String, // Row id local to the feed
    pub track_id: String,      // Raw (possibly aliased) track id
    pub track_name: Option<String>,
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub album_type: Option<String>,
    pub duration_ms: Option<i64>,
    pub played_at: Timestamp,
}

impl RawPlayEvent {
    /// Total order used everywhere events are sequenced: played_at, then
    /// feed tag, then feed-local row id.
    pub fn chronological_cmp(&self, other: &Self) -> Ordering {
        self.played_at
            .cmp(&other.played_at)
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.source_row_id.cmp(&other.source_row_id))
    }
}

/// A raw event after its track id went through the canonicalizer.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayEvent {
    pub raw: RawPlayEvent,
    pub canonical_id: String,
}

/// How an event's statistics are attributed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attribution {
    /// Canonical id has a base catalog entry.
    Exact,
    /// Unknown canonical id, inferred to be `matched_id` by title/artist/duration.
    Fuzzy { matched_id: String },
    /// Unknown canonical id with no fuzzy candidate; gets a synthesized entry.
    NonLibrary,
}

/// Event with its final attribution.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedEvent {
    pub event: PlayEvent,
    pub attribution: Attribution,
}

impl ResolvedEvent {
    /// Track the event counts towards. Never rewrites `canonical_id`.
    pub fn attributed_id(&self) -> &str {
        match &self.attribution {
            Attribution::Fuzzy { matched_id } => matched_id,
            Attribution::Exact | Attribution::NonLibrary => &self.event.canonical_id,
        }
    }

    /// Exact and non-library events are both "exact-match" events: they are
    /// classified and counted under their own canonical id.
    pub fn is_exact_match(&self) -> bool {
        !matches!(self.attribution, Attribution::Fuzzy { .. })
    }

    pub fn played_at(&self) -> Timestamp {
        self.event.raw.played_at
    }
}

/// An exact-match event after resume/skip classification.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedEvent {
    pub track_id: String,
    pub source: String,
    pub source_row_id: String,
    pub played_at: Timestamp,
    pub duration_ms_used: Option<i64>,
    pub is_resume: bool,
    pub is_skip: bool,
}

// ============================================================================
// Catalog
// ============================================================================

/// Where a catalog entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Library,
    LikedOnly,
    NonLibrary,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Library => "library",
            Provenance::LikedOnly => "liked_only",
            Provenance::NonLibrary => "non_library",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "library" => Some(Provenance::Library),
            "liked_only" => Some(Provenance::LikedOnly),
            "non_library" => Some(Provenance::NonLibrary),
            _ => None,
        }
    }
}

/// One catalog row. Before dedup there may be several per canonical id;
/// after dedup exactly one.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub track_id: String,        // Canonical id
    pub source_track_id: String, // Raw id of the row this entry was drawn from
    pub name: Option<String>,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub album_type: Option<String>,
    pub album_image_url: Option<String>,
    pub release_date: Option<String>,
    pub genres: Option<String>,
    pub artist_image: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: i64,
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
    pub provenance: Provenance,
    pub added_at: Option<Timestamp>,
    pub liked_at: Option<Timestamp>,
    pub is_liked: bool,
    pub is_playable: Option<bool>, // None = availability never checked
    pub is_excluded: bool,
}

impl CatalogEntry {
    /// Most recent of added_at / liked_at. `None` sorts as earliest.
    pub fn activity_at(&self) -> Option<Timestamp> {
        self.added_at.max(self.liked_at)
    }
}

// ============================================================================
// Aggregates and output
// ============================================================================

/// Per-canonical-track statistics. Absent tracks get `AggregateStats::default()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub library_play_count: i64,
    pub library_first_played: Option<Timestamp>,
    pub library_last_played: Option<Timestamp>,
    pub resume_count: i64,
    pub skip_count: i64,
    pub fuzzy_play_count: i64,
    pub fuzzy_first_played: Option<Timestamp>,
    pub fuzzy_last_played: Option<Timestamp>,
}

impl AggregateStats {
    /// max(0, library + fuzzy - resumes)
    pub fn play_count(&self) -> i64 {
        (self.library_play_count + self.fuzzy_play_count - self.resume_count).max(0)
    }

    pub fn first_played(&self) -> Option<Timestamp> {
        min_present(self.library_first_played, self.fuzzy_first_played)
    }

    pub fn last_played(&self) -> Option<Timestamp> {
        self.library_last_played.max(self.fuzzy_last_played)
    }

    /// Combine two partial aggregates for the same track. Commutative and
    /// associative, so shards can be reduced in any order.
    pub fn merge(&mut self, other: &AggregateStats) {
        self.library_play_count += other.library_play_count;
        self.library_first_played =
            min_present(self.library_first_played, other.library_first_played);
        self.library_last_played = self.library_last_played.max(other.library_last_played);
        self.resume_count += other.resume_count;
        self.skip_count += other.skip_count;
        self.fuzzy_play_count += other.fuzzy_play_count;
        self.fuzzy_first_played = min_present(self.fuzzy_first_played, other.fuzzy_first_played);
        self.fuzzy_last_played = self.fuzzy_last_played.max(other.fuzzy_last_played);
    }
}

/// Earliest of two optional values, ignoring `None` unless both are `None`.
pub fn min_present<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// The engine's output row: a catalog entry joined with its statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct UnifiedCatalogRow {
    pub entry: CatalogEntry,
    pub stats: AggregateStats,
    /// Earliest of (entry.added_at, entry.liked_at, first played).
    pub added_at: Option<Timestamp>,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-feed ingestion counters.
#[derive(Default, Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FeedStats {
    pub tag: String,
    pub events_read: usize,
    pub dropped_missing_played_at: usize,
    pub dropped_missing_track_id: usize,
}

/// Counters for one rebuild pass. Logged as JSON and optionally written to a
/// stats file; never stored in the output database.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RebuildStats {
    // Ingestion
    pub feeds: Vec<FeedStats>,
    pub total_events: usize,
    pub alias_resolved_events: usize,
    pub override_entries: usize,

    // Catalog
    pub catalog_rows_raw: usize,
    pub catalog_rows_deduped: usize,

    // Attribution
    pub exact_events: usize,
    pub fuzzy_matched_events: usize,
    pub fuzzy_ambiguous_events: usize,
    pub non_library_events: usize,
    pub non_library_tracks: usize,

    // Classification
    pub resume_events: usize,
    pub skip_events: usize,
    pub unresolved_duration_events: usize,

    // Enrichment
    pub enrichment_hits: usize,
    pub enrichment_failures: usize,

    // Output
    pub output_rows: usize,
    pub elapsed_seconds: f64,
}

impl RebuildStats {
    /// Log stats as JSON
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!(phase, "rebuild stats\n{}", json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Share of events that could be attributed to a catalog track (exact or fuzzy).
    pub fn attribution_rate(&self) -> f64 {
        if self.total_events == 0 {
            0.0
        } else {
            100.0 * (self.exact_events + self.fuzzy_matched_events) as f64
                / self.total_events as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_play_count_subtracts_resumes_and_floors_at_zero() {
        let stats = AggregateStats {
            library_play_count: 3,
            resume_count: 1,
            ..Default::default()
        };
        assert_eq!(stats.play_count(), 2);

        let odd = AggregateStats {
            library_play_count: 0,
            fuzzy_play_count: 1,
            resume_count: 4,
            ..Default::default()
        };
        assert_eq!(odd.play_count(), 0);
    }

    #[test]
    fn test_first_last_played_ignore_missing_side() {
        let only_fuzzy = AggregateStats {
            fuzzy_first_played: Some(ts(10)),
            fuzzy_last_played: Some(ts(20)),
            ..Default::default()
        };
        assert_eq!(only_fuzzy.first_played(), Some(ts(10)));
        assert_eq!(only_fuzzy.last_played(), Some(ts(20)));

        let both = AggregateStats {
            library_first_played: Some(ts(5)),
            library_last_played: Some(ts(15)),
            fuzzy_first_played: Some(ts(10)),
            fuzzy_last_played: Some(ts(20)),
            ..Default::default()
        };
        assert_eq!(both.first_played(), Some(ts(5)));
        assert_eq!(both.last_played(), Some(ts(20)));

        assert_eq!(AggregateStats::default().first_played(), None);
        assert_eq!(AggregateStats::default().last_played(), None);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = AggregateStats {
            library_play_count: 2,
            library_first_played: Some(ts(100)),
            library_last_played: Some(ts(200)),
            resume_count: 1,
            ..Default::default()
        };
        let b = AggregateStats {
            library_play_count: 1,
            library_first_played: Some(ts(50)),
            library_last_played: Some(ts(150)),
            skip_count: 1,
            ..Default::default()
        };

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.library_play_count, 3);
        assert_eq!(ab.library_first_played, Some(ts(50)));
        assert_eq!(ab.library_last_played, Some(ts(200)));
    }

    #[test]
    fn test_provenance_round_trips_through_str() {
        for p in [Provenance::Library, Provenance::LikedOnly, Provenance::NonLibrary] {
            assert_eq!(Provenance::parse(p.as_str()), Some(p));
        }
        assert_eq!(Provenance::parse("album"), None);
    }
}
