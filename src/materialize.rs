//! Final join of catalog entries and statistics into output rows.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::aggregate::Aggregates;
use crate::enrich::{enrich_best_effort, EnrichmentRequest, MetadataEnricher};
use crate::models::{
    min_present, Attribution, CatalogEntry, PlayEvent, Provenance, RebuildStats, ResolvedEvent,
    UnifiedCatalogRow,
};

/// One synthesized entry per canonical id seen only in non-library events,
/// drawn from its most recent such event. Ordered by track id.
pub fn synthesize_non_library(
    resolved: &[ResolvedEvent],
    enricher: &dyn MetadataEnricher,
    excluded: &FxHashSet<String>,
    stats: &mut RebuildStats,
) -> Vec<CatalogEntry> {
    let mut latest: FxHashMap<&str, &PlayEvent> = FxHashMap::default();
    for event in resolved.iter().filter(|e| e.attribution == Attribution::NonLibrary) {
        latest
            .entry(event.event.canonical_id.as_str())
            .and_modify(|current| {
                if event.event.raw.chronological_cmp(&current.raw).is_gt() {
                    *current = &event.event;
                }
            })
            .or_insert(&event.event);
    }

    let mut picked: Vec<&PlayEvent> = latest.into_values().collect();
    picked.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));

    let entries: Vec<CatalogEntry> = picked
        .into_iter()
        .map(|event| {
            let raw = &event.raw;
            let request = EnrichmentRequest {
                track_id: event.canonical_id.clone(),
                artist_id: raw.artist_id.clone(),
                album_id: raw.album_id.clone(),
            };
            let extra = enrich_best_effort(enricher, &request, stats).unwrap_or_default();

            CatalogEntry {
                track_id: event.canonical_id.clone(),
                source_track_id: raw.track_id.clone(),
                name: raw.track_name.clone(),
                artist: raw.artist_name.clone(),
                artist_id: raw.artist_id.clone(),
                album_id: raw.album_id.clone(),
                album_name: extra.album_name.or_else(|| raw.album_name.clone()),
                album_type: extra.album_type.or_else(|| raw.album_type.clone()),
                album_image_url: extra.album_image_url,
                release_date: extra.release_date,
                genres: extra.genres,
                artist_image: extra.artist_image,
                track_number: None,
                disc_number: 1,
                duration_ms: raw.duration_ms,
                popularity: None,
                provenance: Provenance::NonLibrary,
                added_at: None,
                liked_at: None,
                is_liked: false,
                is_playable: Some(true),
                is_excluded: excluded.contains(&event.canonical_id),
            }
        })
        .collect();

    stats.non_library_tracks = entries.len();
    entries
}

/// Join statistics onto every entry (absent stats become zero/null) and
/// compute the normalized `added_at`. Output is sorted by track id.
pub fn materialize(
    catalog: Vec<CatalogEntry>,
    non_library: Vec<CatalogEntry>,
    aggregates: &Aggregates,
) -> Vec<UnifiedCatalogRow> {
    let mut rows: Vec<UnifiedCatalogRow> = catalog
        .into_iter()
        .chain(non_library)
        .map(|entry| {
            let stats = aggregates.get(&entry.track_id).cloned().unwrap_or_default();
            let added_at = min_present(min_present(entry.added_at, entry.liked_at), stats.first_played());
            UnifiedCatalogRow {
                entry,
                stats,
                added_at,
            }
        })
        .collect();

    rows.sort_by(|a, b| a.entry.track_id.cmp(&b.entry.track_id));
    rows
}
