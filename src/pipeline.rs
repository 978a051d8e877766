//! One full rebuild pass.
//!
//! Phases run in a fixed order against a single read snapshot of the source
//! database:
//!
//! 1. Load and validate id overrides
//! 2. Load and dedup the base catalog
//! 3. Merge all event feeds into one canonicalized stream
//! 4. Attribute events (exact / fuzzy / non-library)
//! 5. Classify resumes and skips
//! 6. Aggregate per track
//! 7. Synthesize non-library rows and materialize the output
//!
//! [`run_rebuild`] wraps the pass with the lease, the staging write and the
//! atomic publish.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::aggregate::aggregate;
use crate::canonical::{Canonicalizer, EquivalenceOverrides};
use crate::catalog::Catalog;
use crate::classify::classify;
use crate::config::EngineConfig;
use crate::enrich::{BoundedEnricher, CatalogMetadata, MetadataEnricher};
use crate::fuzzy::{resolve_events, FuzzyIndex};
use crate::lock::{lease_path, RebuildLease};
use crate::materialize::{materialize, synthesize_non_library};
use crate::models::{RebuildStats, UnifiedCatalogRow};
use crate::progress::{create_spinner, finish, format_duration};
use crate::safety::{validate_output_path, OUTPUT_PATTERN};
use crate::source::{merge_sources, sources_from_config, EventSource};
use crate::store::{discard, publish, staging_path, write_unified};

/// Compute the unified rows from an open source database. Pure with respect
/// to its inputs: the same database content gives the same rows.
pub fn build_unified(
    conn: &Connection,
    sources: &[Box<dyn EventSource>],
    enricher: &dyn MetadataEnricher,
    config: &EngineConfig,
) -> Result<(Vec<UnifiedCatalogRow>, RebuildStats)> {
    let mut stats = RebuildStats::default();

    // Phase 1
    let overrides = EquivalenceOverrides::load(conn).context("Invalid track id overrides")?;
    stats.override_entries = overrides.len();
    let canonicalizer = Canonicalizer::new(&overrides);
    tracing::info!(overrides = overrides.len(), "loaded track id overrides");

    // Phase 2
    let spinner = create_spinner("Phase 2: Loading catalog");
    let catalog = Catalog::load(conn, &canonicalizer, &mut stats)?;
    finish(
        &spinner,
        format!(
            "Phase 2: {} catalog rows, {} after dedup",
            stats.catalog_rows_raw, stats.catalog_rows_deduped
        ),
    );

    // Phase 3
    let spinner = create_spinner("Phase 3: Merging event feeds");
    let events = merge_sources(conn, sources, &canonicalizer, &mut stats)?;
    finish(
        &spinner,
        format!(
            "Phase 3: {} events from {} feeds ({} via overrides)",
            stats.total_events,
            sources.len(),
            stats.alias_resolved_events
        ),
    );

    // Phase 4
    let spinner = create_spinner("Phase 4: Attributing events");
    let resolved = {
        let index = FuzzyIndex::build(&catalog.entries, config.duration_tolerance_ms);
        let ids = catalog.ids();
        resolve_events(events, &ids, &index, &mut stats)
    };
    finish(
        &spinner,
        format!(
            "Phase 4: {} exact, {} fuzzy ({} ambiguous), {} non-library",
            stats.exact_events, stats.fuzzy_matched_events, stats.fuzzy_ambiguous_events, stats.non_library_events
        ),
    );

    // Phase 5
    let spinner = create_spinner("Phase 5: Classifying resumes and skips");
    let classified = classify(&resolved, &catalog.durations, config.skip_ratio, &mut stats);
    finish(
        &spinner,
        format!(
            "Phase 5: {} resumes, {} skips, {} without duration",
            stats.resume_events, stats.skip_events, stats.unresolved_duration_events
        ),
    );

    // Phase 6
    let aggregates = aggregate(&classified, &resolved);
    tracing::info!(tracks = aggregates.len(), "aggregated play statistics");

    // Phase 7
    let spinner = create_spinner("Phase 7: Materializing");
    let non_library = synthesize_non_library(&resolved, enricher, &catalog.excluded, &mut stats);
    let rows = materialize(catalog.entries, non_library, &aggregates);
    stats.output_rows = rows.len();
    finish(
        &spinner,
        format!(
            "Phase 7: {} rows ({} non-library, {} enriched)",
            rows.len(),
            stats.non_library_tracks,
            stats.enrichment_hits
        ),
    );

    Ok((rows, stats))
}

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub source_db: PathBuf,
    pub output_db: PathBuf,
    pub config: EngineConfig,
    /// Where to also write the pass statistics as JSON.
    pub stats_path: Option<PathBuf>,
}

#[derive(Debug)]
pub enum RebuildOutcome {
    Published { rows: usize, stats: RebuildStats },
    /// Another pass held the lease; nothing was done.
    Skipped,
}

fn open_source(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_context(|| format!("Failed to open source database {:?}", path))?;
    conn.execute_batch(
        "PRAGMA mmap_size = 268435456;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

/// Run a complete pass and publish it. A failure at any point leaves the
/// previously published output untouched.
pub fn run_rebuild(options: &RebuildOptions) -> Result<RebuildOutcome> {
    let RebuildOptions {
        source_db,
        output_db,
        config,
        stats_path,
    } = options;

    validate_output_path(output_db, OUTPUT_PATTERN, &[source_db.as_path()])?;
    config.validate().context("Invalid engine configuration")?;

    let lease = RebuildLease::acquire(
        &lease_path(output_db),
        Duration::from_secs(config.lease_stale_after_secs),
    )?;
    let Some(_lease) = lease else {
        return Ok(RebuildOutcome::Skipped);
    };

    let start = Instant::now();
    tracing::info!(source = %source_db.display(), output = %output_db.display(), "starting rebuild");

    let mut conn = open_source(source_db)?;
    // One read transaction so every phase sees the same snapshot.
    let snapshot = conn.transaction().context("Failed to open read snapshot")?;

    let enricher = BoundedEnricher::new(
        CatalogMetadata::load(&snapshot)?,
        Duration::from_millis(config.enrichment_timeout_ms),
    )?;
    let sources = sources_from_config(&config.feeds);
    let (rows, mut stats) = build_unified(&snapshot, &sources, &enricher, config)?;
    drop(snapshot);

    let staging = staging_path(output_db);
    if let Err(e) = write_unified(&staging, &rows).and_then(|()| publish(&staging, output_db)) {
        discard(&staging);
        return Err(e);
    }

    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    stats.log_phase("complete");
    // The new output is already live; a stats file problem is not a failed pass.
    if let Some(path) = stats_path {
        if let Err(e) = stats.write_to_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write stats file");
        }
    }
    tracing::info!(rows = rows.len(), elapsed = %format_duration(start.elapsed()), "rebuild complete");

    Ok(RebuildOutcome::Published {
        rows: rows.len(),
        stats,
    })
}
