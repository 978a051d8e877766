//! Approximate identity matching for events unknown to the catalog.
//!
//! Only events whose canonical id has no catalog entry are looked up. A
//! candidate qualifies when normalized title and artist are equal and the
//! durations differ by at most the tolerance. Among several qualifying
//! candidates the smallest duration delta wins, then the smallest track id.
//!
//! A match only attributes the event's statistics; the event's own canonical
//! id is never rewritten.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::{Attribution, CatalogEntry, PlayEvent, RebuildStats, ResolvedEvent};
use crate::normalize::match_key;

/// Catalog entry reduced to what matching needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuzzyCandidate {
    pub track_id: String,
    pub duration_ms: i64,
}

/// Result of one lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FuzzyOutcome {
    NoMatch,
    Unique(String),
    /// Several candidates qualified; `chosen` won the tie-break.
    Ambiguous { chosen: String, qualifying: usize },
}

impl FuzzyOutcome {
    pub fn matched_id(&self) -> Option<&str> {
        match self {
            FuzzyOutcome::NoMatch => None,
            FuzzyOutcome::Unique(id) | FuzzyOutcome::Ambiguous { chosen: id, .. } => Some(id),
        }
    }
}

/// Candidates grouped by normalized (title, artist).
pub struct FuzzyIndex {
    by_key: FxHashMap<(String, String), Vec<FuzzyCandidate>>,
    tolerance_ms: u64,
}

impl FuzzyIndex {
    /// Entries without a duration or without a usable title/artist are not
    /// candidates.
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>, tolerance_ms: i64) -> Self {
        let mut by_key: FxHashMap<(String, String), Vec<FuzzyCandidate>> = FxHashMap::default();
        for entry in entries {
            let Some(duration_ms) = entry.duration_ms else {
                continue;
            };
            let Some(key) = match_key(entry.name.as_deref(), entry.artist.as_deref()) else {
                continue;
            };
            by_key.entry(key).or_default().push(FuzzyCandidate {
                track_id: entry.track_id.clone(),
                duration_ms,
            });
        }
        Self {
            by_key,
            tolerance_ms: u64::try_from(tolerance_ms).unwrap_or(0),
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn lookup(&self, title: Option<&str>, artist: Option<&str>, duration_ms: Option<i64>) -> FuzzyOutcome {
        let Some(duration_ms) = duration_ms else {
            return FuzzyOutcome::NoMatch;
        };
        let Some(key) = match_key(title, artist) else {
            return FuzzyOutcome::NoMatch;
        };
        let Some(candidates) = self.by_key.get(&key) else {
            return FuzzyOutcome::NoMatch;
        };

        let mut qualifying: Vec<(u64, &str)> = candidates
            .iter()
            .map(|c| (c.duration_ms.abs_diff(duration_ms), c.track_id.as_str()))
            .filter(|(delta, _)| *delta <= self.tolerance_ms)
            .collect();

        match qualifying.len() {
            0 => FuzzyOutcome::NoMatch,
            1 => FuzzyOutcome::Unique(qualifying[0].1.to_string()),
            n => {
                qualifying.sort_unstable();
                FuzzyOutcome::Ambiguous {
                    chosen: qualifying[0].1.to_string(),
                    qualifying: n,
                }
            }
        }
    }
}

/// Attribute every event: exact when its canonical id is in the catalog,
/// fuzzy when the index finds a candidate, non-library otherwise. Order of
/// `events` is preserved.
pub fn resolve_events(
    events: Vec<PlayEvent>,
    catalog_ids: &FxHashSet<&str>,
    index: &FuzzyIndex,
    stats: &mut RebuildStats,
) -> Vec<ResolvedEvent> {
    let resolved: Vec<(ResolvedEvent, bool)> = events
        .into_par_iter()
        .map(|event| {
            if catalog_ids.contains(event.canonical_id.as_str()) {
                return (
                    ResolvedEvent {
                        event,
                        attribution: Attribution::Exact,
                    },
                    false,
                );
            }

            let outcome = index.lookup(
                event.raw.track_name.as_deref(),
                event.raw.artist_name.as_deref(),
                event.raw.duration_ms,
            );
            let ambiguous = matches!(outcome, FuzzyOutcome::Ambiguous { .. });
            let attribution = match outcome.matched_id() {
                Some(id) => Attribution::Fuzzy {
                    matched_id: id.to_string(),
                },
                None => Attribution::NonLibrary,
            };
            (ResolvedEvent { event, attribution }, ambiguous)
        })
        .collect();

    let mut out = Vec::with_capacity(resolved.len());
    for (event, ambiguous) in resolved {
        match event.attribution {
            Attribution::Exact => stats.exact_events += 1,
            Attribution::Fuzzy { .. } => stats.fuzzy_matched_events += 1,
            Attribution::NonLibrary => stats.non_library_events += 1,
        }
        if ambiguous {
            stats.fuzzy_ambiguous_events += 1;
        }
        out.push(event);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provenance, RawPlayEvent};
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, name: &str, artist: &str, duration_ms: Option<i64>) -> CatalogEntry {
        CatalogEntry {
            track_id: id.to_string(),
            source_track_id: id.to_string(),
            name: Some(name.to_string()),
            artist: Some(artist.to_string()),
            artist_id: None,
            album_id: None,
            album_name: None,
            album_type: None,
            album_image_url: None,
            release_date: None,
            genres: None,
            artist_image: None,
            track_number: None,
            disc_number: 1,
            duration_ms,
            popularity: None,
            provenance: Provenance::Library,
            added_at: None,
            liked_at: None,
            is_liked: false,
            is_playable: None,
            is_excluded: false,
        }
    }

    fn event(track_id: &str, name: &str, artist: &str, duration_ms: Option<i64>) -> PlayEvent {
        PlayEvent {
            raw: RawPlayEvent {
                source: "plays".to_string(),
                source_row_id: "1".to_string(),
                track_id: track_id.to_string(),
                track_name: Some(name.to_string()),
                artist_id: None,
                artist_name: Some(artist.to_string()),
                album_id: None,
                album_name: None,
                album_type: None,
                duration_ms,
                played_at: Utc.timestamp_opt(0, 0).unwrap(),
            },
            canonical_id: track_id.to_string(),
        }
    }

    #[test]
    fn test_unique_match_within_tolerance() {
        let entries = vec![entry("B", "Song", "Band", Some(210500))];
        let index = FuzzyIndex::build(&entries, 1000);
        assert_eq!(
            index.lookup(Some("song"), Some("BAND"), Some(210000)),
            FuzzyOutcome::Unique("B".to_string())
        );
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let entries = vec![entry("B", "Song", "Band", Some(211000))];
        let index = FuzzyIndex::build(&entries, 1000);
        assert_eq!(index.lookup(Some("Song"), Some("Band"), Some(210000)).matched_id(), Some("B"));
        assert_eq!(index.lookup(Some("Song"), Some("Band"), Some(209999)), FuzzyOutcome::NoMatch);
    }

    #[test]
    fn test_diacritics_and_whitespace_ignored() {
        let entries = vec![entry("B", "Café  del Mar", "Energy 52", Some(100000))];
        let index = FuzzyIndex::build(&entries, 1000);
        assert_eq!(
            index.lookup(Some(" cafe del mar"), Some("energy 52 "), Some(100000)).matched_id(),
            Some("B")
        );
    }

    #[test]
    fn test_extreme_durations_do_not_overflow() {
        let entries = vec![entry("B", "Song", "Band", Some(i64::MAX))];
        let index = FuzzyIndex::build(&entries, 1000);
        assert_eq!(index.lookup(Some("Song"), Some("Band"), Some(i64::MIN)), FuzzyOutcome::NoMatch);
        assert_eq!(index.lookup(Some("Song"), Some("Band"), Some(i64::MAX - 1000)).matched_id(), Some("B"));
    }

    #[test]
    fn test_missing_durations_never_match() {
        let entries = vec![entry("B", "Song", "Band", None), entry("C", "Song", "Band", Some(1000))];
        let index = FuzzyIndex::build(&entries, 1000);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(Some("Song"), Some("Band"), None), FuzzyOutcome::NoMatch);
    }

    #[test]
    fn test_ambiguous_prefers_smallest_delta_then_id() {
        let entries = vec![
            entry("Z", "Song", "Band", Some(100200)),
            entry("Y", "Song", "Band", Some(100900)),
            entry("X", "Song", "Band", Some(99800)),
        ];
        let index = FuzzyIndex::build(&entries, 1000);
        // Z and X are both 200 ms away; X wins on id.
        assert_eq!(
            index.lookup(Some("Song"), Some("Band"), Some(100000)),
            FuzzyOutcome::Ambiguous {
                chosen: "X".to_string(),
                qualifying: 3
            }
        );

        let mut reversed = entries.clone();
        reversed.reverse();
        let index = FuzzyIndex::build(&reversed, 1000);
        assert_eq!(index.lookup(Some("Song"), Some("Band"), Some(100000)).matched_id(), Some("X"));
    }

    #[test]
    fn test_resolve_events_attribution() {
        let entries = vec![entry("A", "Known", "Band", Some(200000)), entry("B", "Song", "Band", Some(210500))];
        let index = FuzzyIndex::build(&entries, 1000);
        let ids: FxHashSet<&str> = entries.iter().map(|e| e.track_id.as_str()).collect();
        let events = vec![
            event("A", "Known", "Band", Some(200000)),
            event("X123", "Song", "Band", Some(210000)),
            event("Q", "Nothing", "Nobody", Some(1000)),
        ];
        let mut stats = RebuildStats::default();

        let resolved = resolve_events(events, &ids, &index, &mut stats);
        assert_eq!(resolved[0].attribution, Attribution::Exact);
        assert_eq!(
            resolved[1].attribution,
            Attribution::Fuzzy {
                matched_id: "B".to_string()
            }
        );
        assert_eq!(resolved[1].event.canonical_id, "X123");
        assert_eq!(resolved[1].attributed_id(), "B");
        assert_eq!(resolved[2].attribution, Attribution::NonLibrary);
        assert_eq!(
            (stats.exact_events, stats.fuzzy_matched_events, stats.non_library_events),
            (1, 1, 1)
        );
    }
}
