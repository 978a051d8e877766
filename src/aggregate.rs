//! Per-track statistics.
//!
//! Shards are folded in parallel and reduced with `AggregateStats::merge`,
//! which is order independent, so the result does not depend on scheduling.

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::models::{AggregateStats, Attribution, ClassifiedEvent, ResolvedEvent};

pub type Aggregates = FxHashMap<String, AggregateStats>;

fn merge_maps(mut into: Aggregates, from: Aggregates) -> Aggregates {
    for (track_id, stats) in from {
        into.entry(track_id).or_default().merge(&stats);
    }
    into
}

/// Exact-match counts from classified events plus fuzzy counts from events
/// attributed to a matched track.
pub fn aggregate(classified: &[ClassifiedEvent], resolved: &[ResolvedEvent]) -> Aggregates {
    let library = classified
        .par_iter()
        .fold(Aggregates::default, |mut acc, event| {
            let stats = acc.entry(event.track_id.clone()).or_default();
            stats.merge(&AggregateStats {
                library_play_count: 1,
                library_first_played: Some(event.played_at),
                library_last_played: Some(event.played_at),
                resume_count: i64::from(event.is_resume),
                skip_count: i64::from(event.is_skip),
                ..Default::default()
            });
            acc
        })
        .reduce(Aggregates::default, merge_maps);

    let fuzzy = resolved
        .par_iter()
        .filter_map(|event| match &event.attribution {
            Attribution::Fuzzy { matched_id } => Some((matched_id, event.played_at())),
            _ => None,
        })
        .fold(Aggregates::default, |mut acc, (matched_id, played_at)| {
            acc.entry(matched_id.clone()).or_default().merge(&AggregateStats {
                fuzzy_play_count: 1,
                fuzzy_first_played: Some(played_at),
                fuzzy_last_played: Some(played_at),
                ..Default::default()
            });
            acc
        })
        .reduce(Aggregates::default, merge_maps);

    merge_maps(library, fuzzy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlayEvent, RawPlayEvent, Timestamp};
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn classified(track: &str, secs: i64, is_resume: bool, is_skip: bool) -> ClassifiedEvent {
        ClassifiedEvent {
            track_id: track.to_string(),
            source: "plays".to_string(),
            source_row_id: secs.to_string(),
            played_at: ts(secs),
            duration_ms_used: Some(200_000),
            is_resume,
            is_skip,
        }
    }

    fn fuzzy(raw_id: &str, matched: &str, secs: i64) -> ResolvedEvent {
        ResolvedEvent {
            event: PlayEvent {
                raw: RawPlayEvent {
                    source: "plays".to_string(),
                    source_row_id: secs.to_string(),
                    track_id: raw_id.to_string(),
                    track_name: None,
                    artist_id: None,
                    artist_name: None,
                    album_id: None,
                    album_name: None,
                    album_type: None,
                    duration_ms: None,
                    played_at: ts(secs),
                },
                canonical_id: raw_id.to_string(),
            },
            attribution: Attribution::Fuzzy {
                matched_id: matched.to_string(),
            },
        }
    }

    #[test]
    fn test_scenario_a_counts() {
        let events = vec![
            classified("A", 0, false, false),
            classified("A", 150, true, false),
            classified("A", 400, false, false),
        ];
        let aggregates = aggregate(&events, &[]);
        let a = &aggregates["A"];
        assert_eq!(a.library_play_count, 3);
        assert_eq!(a.resume_count, 1);
        assert_eq!(a.skip_count, 0);
        assert_eq!(a.play_count(), 2);
        assert_eq!(a.library_first_played, Some(ts(0)));
        assert_eq!(a.library_last_played, Some(ts(400)));
    }

    #[test]
    fn test_fuzzy_counts_go_to_matched_track() {
        let events = vec![classified("B", 100, false, true)];
        let resolved = vec![fuzzy("X123", "B", 50), fuzzy("X124", "B", 500)];
        let aggregates = aggregate(&events, &resolved);

        assert!(!aggregates.contains_key("X123"));
        let b = &aggregates["B"];
        assert_eq!(b.library_play_count, 1);
        assert_eq!(b.skip_count, 1);
        assert_eq!(b.fuzzy_play_count, 2);
        assert_eq!(b.play_count(), 3);
        assert_eq!(b.first_played(), Some(ts(50)));
        assert_eq!(b.last_played(), Some(ts(500)));
    }

    #[test]
    fn test_play_count_identity_holds_for_every_track() {
        let events: Vec<ClassifiedEvent> = (0..200)
            .map(|i| classified(&format!("T{}", i % 7), i, i % 3 == 0, i % 5 == 0))
            .collect();
        let resolved: Vec<ResolvedEvent> = (0..50).map(|i| fuzzy("X", &format!("T{}", i % 4), i)).collect();

        for stats in aggregate(&events, &resolved).values() {
            assert_eq!(
                stats.play_count(),
                (stats.library_play_count + stats.fuzzy_play_count - stats.resume_count).max(0)
            );
        }
    }
}
