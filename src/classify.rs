//! Resume and skip classification of exact-match events.
//!
//! Resumes are decided per track: an event is a resume when it starts before
//! the track's previous event had time to finish. Skips are decided on the
//! global stream: an event is a skip when the very next event (any source,
//! any attribution) is a different track and arrives within `skip_ratio` of
//! the duration. Fuzzy-matched events are never classified but still act as
//! successors under the track they are attributed to.

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::catalog::DurationIndex;
use crate::models::{ClassifiedEvent, RebuildStats, ResolvedEvent, Timestamp};

fn gap_ms(from: Timestamp, to: Timestamp) -> i64 {
    (to - from).num_milliseconds()
}

/// Returns one `ClassifiedEvent` per exact-match event, in chronological order.
pub fn classify(
    resolved: &[ResolvedEvent],
    durations: &DurationIndex,
    skip_ratio: f64,
    stats: &mut RebuildStats,
) -> Vec<ClassifiedEvent> {
    let mut order: Vec<usize> = (0..resolved.len()).collect();
    order.par_sort_by(|&a, &b| resolved[a].event.raw.chronological_cmp(&resolved[b].event.raw));

    let mut classified: Vec<ClassifiedEvent> = Vec::with_capacity(resolved.len());
    let mut by_track: FxHashMap<&str, Vec<usize>> = FxHashMap::default();

    // Single ordered pass for skips.
    for (pos, &idx) in order.iter().enumerate() {
        let current = &resolved[idx];
        if !current.is_exact_match() {
            continue;
        }
        let track_id = current.event.canonical_id.as_str();
        let duration_ms_used = durations.resolve(track_id, current.event.raw.duration_ms);

        let is_skip = match (duration_ms_used, order.get(pos + 1)) {
            (Some(duration), Some(&next_idx)) => {
                let next = &resolved[next_idx];
                next.attributed_id() != track_id
                    && (gap_ms(current.played_at(), next.played_at()) as f64) < skip_ratio * duration as f64
            }
            _ => false,
        };

        by_track.entry(track_id).or_default().push(classified.len());
        classified.push(ClassifiedEvent {
            track_id: track_id.to_string(),
            source: current.event.raw.source.clone(),
            source_row_id: current.event.raw.source_row_id.clone(),
            played_at: current.played_at(),
            duration_ms_used,
            is_resume: false,
            is_skip,
        });
    }

    // Per-track resume pass. Each partition is already chronological.
    let resumes: Vec<usize> = by_track
        .par_iter()
        .flat_map_iter(|(_, positions)| {
            positions
                .windows(2)
                .filter(|pair| {
                    let (prev, cur) = (&classified[pair[0]], &classified[pair[1]]);
                    cur.duration_ms_used
                        .map(|duration| gap_ms(prev.played_at, cur.played_at) < duration)
                        .unwrap_or(false)
                })
                .map(|pair| pair[1])
                .collect::<Vec<_>>()
        })
        .collect();

    for pos in resumes {
        classified[pos].is_resume = true;
    }

    for event in &classified {
        if event.duration_ms_used.is_none() {
            stats.unresolved_duration_events += 1;
        }
        if event.is_resume {
            stats.resume_events += 1;
        }
        if event.is_skip {
            stats.skip_events += 1;
        }
    }

    classified
}
