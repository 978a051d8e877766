//! Opportunistic album/artist metadata for synthesized non-library rows.
//!
//! Enrichment never fails a pass: errors and timeouts are logged, counted and
//! the row is written without the optional fields.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use rusqlite::Connection;
use rustc_hash::FxHashMap;
use std::thread;
use std::time::Duration;

use crate::error::EnrichError;
use crate::models::RebuildStats;

/// Identifiers available for a non-library track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub track_id: String,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
}

/// Optional metadata an enricher may supply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub album_name: Option<String>,
    pub album_type: Option<String>,
    pub album_image_url: Option<String>,
    pub release_date: Option<String>,
    pub genres: Option<String>,
    pub artist_image: Option<String>,
}

pub trait MetadataEnricher: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the enricher knows nothing about the request.
    fn enrich(&self, request: &EnrichmentRequest) -> Result<Option<Enrichment>, EnrichError>;
}

// ============================================================================
// Source database lookups
// ============================================================================

#[derive(Clone, Debug, Default)]
struct AlbumMeta {
    name: Option<String>,
    album_type: Option<String>,
    image_url: Option<String>,
    release_date: Option<String>,
    artist_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct ArtistMeta {
    genres: Option<String>,
    image_url: Option<String>,
}

/// Serves lookups from the source database's `albums` and `artists` tables,
/// read once per pass. Includes unsaved albums.
#[derive(Clone, Debug, Default)]
pub struct CatalogMetadata {
    albums: FxHashMap<String, AlbumMeta>,
    artists: FxHashMap<String, ArtistMeta>,
}

impl CatalogMetadata {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare("SELECT id, name, album_type, album_image_url, release_date, artist_id FROM albums WHERE id IS NOT NULL")
            .context("Failed to query albums")?;
        let albums = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    AlbumMeta {
                        name: row.get(1)?,
                        album_type: row.get(2)?,
                        image_url: row.get(3)?,
                        release_date: row.get(4)?,
                        artist_id: row.get(5)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<FxHashMap<_, _>>>()
            .context("Failed to read albums")?;

        let mut stmt = conn
            .prepare("SELECT id, genres, image_url FROM artists WHERE id IS NOT NULL")
            .context("Failed to query artists")?;
        let artists = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ArtistMeta {
                        genres: row.get(1)?,
                        image_url: row.get(2)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<FxHashMap<_, _>>>()
            .context("Failed to read artists")?;

        Ok(Self { albums, artists })
    }
}

impl MetadataEnricher for CatalogMetadata {
    fn name(&self) -> &str {
        "catalog"
    }

    fn enrich(&self, request: &EnrichmentRequest) -> Result<Option<Enrichment>, EnrichError> {
        let album = request.album_id.as_deref().and_then(|id| self.albums.get(id));
        let artist_id = request
            .artist_id
            .as_deref()
            .or_else(|| album.and_then(|a| a.artist_id.as_deref()));
        let artist = artist_id.and_then(|id| self.artists.get(id));

        if album.is_none() && artist.is_none() {
            return Ok(None);
        }

        let album = album.cloned().unwrap_or_default();
        let artist = artist.cloned().unwrap_or_default();
        Ok(Some(Enrichment {
            album_name: album.name,
            album_type: album.album_type,
            album_image_url: album.image_url,
            release_date: album.release_date,
            genres: artist.genres,
            artist_image: artist.image_url,
        }))
    }
}

// ============================================================================
// Time limit
// ============================================================================

type EnrichResult = Result<Option<Enrichment>, EnrichError>;
type EnrichJob = (EnrichmentRequest, Sender<EnrichResult>);

/// Serves calls of the wrapped enricher from one long-lived worker thread
/// and gives up on a call after `timeout`. An abandoned call keeps the worker
/// busy until it returns; its result is dropped. The worker exits once the
/// `BoundedEnricher` is dropped and the queue drains.
pub struct BoundedEnricher {
    name: String,
    jobs: Sender<EnrichJob>,
    timeout: Duration,
}

impl BoundedEnricher {
    pub fn new<E: MetadataEnricher + 'static>(inner: E, timeout: Duration) -> Result<Self> {
        let name = inner.name().to_string();
        let (jobs, queue) = unbounded::<EnrichJob>();

        thread::Builder::new()
            .name(format!("enrich-{}", name))
            .spawn(move || {
                for (request, reply) in queue {
                    // Receiver may be gone after a timeout.
                    let _ = reply.send(inner.enrich(&request));
                }
            })
            .with_context(|| format!("Failed to start {} enrichment worker", name))?;

        Ok(Self { name, jobs, timeout })
    }
}

impl MetadataEnricher for BoundedEnricher {
    fn name(&self) -> &str {
        &self.name
    }

    fn enrich(&self, request: &EnrichmentRequest) -> EnrichResult {
        let (reply, rx) = bounded(1);
        let disconnected = || EnrichError::Disconnected {
            enricher: self.name.clone(),
        };
        self.jobs.send((request.clone(), reply)).map_err(|_| disconnected())?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EnrichError::TimedOut {
                enricher: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(disconnected()),
        }
    }
}

/// Call the enricher, turning any failure into a warning and `None`.
pub fn enrich_best_effort(
    enricher: &dyn MetadataEnricher,
    request: &EnrichmentRequest,
    stats: &mut RebuildStats,
) -> Option<Enrichment> {
    match enricher.enrich(request) {
        Ok(Some(enrichment)) => {
            stats.enrichment_hits += 1;
            Some(enrichment)
        }
        Ok(None) => None,
        Err(e) => {
            stats.enrichment_failures += 1;
            tracing::warn!(track_id = %request.track_id, error = %e, "enrichment skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SOURCE_SCHEMA;
    use std::sync::{Arc, Mutex};

    fn request(album_id: Option<&str>, artist_id: Option<&str>) -> EnrichmentRequest {
        EnrichmentRequest {
            track_id: "N1".to_string(),
            artist_id: artist_id.map(str::to_string),
            album_id: album_id.map(str::to_string),
        }
    }

    fn metadata() -> CatalogMetadata {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SOURCE_SCHEMA).unwrap();
        conn.execute_batch(
            "INSERT INTO albums (id, name, artist_id, album_type, album_image_url, release_date, is_saved) VALUES
                ('al9', 'Far Album', 'ar9', 'single', 'http://img/al9', '2019-05-01', 0);
             INSERT INTO artists (id, name, genres, image_url) VALUES ('ar9', 'Far Band', 'jazz', 'http://img/ar9');",
        )
        .unwrap();
        CatalogMetadata::load(&conn).unwrap()
    }

    struct Slow;

    impl MetadataEnricher for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn enrich(&self, _request: &EnrichmentRequest) -> Result<Option<Enrichment>, EnrichError> {
            thread::sleep(Duration::from_millis(500));
            Ok(Some(Enrichment::default()))
        }
    }

    struct Broken;

    impl MetadataEnricher for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn enrich(&self, _request: &EnrichmentRequest) -> Result<Option<Enrichment>, EnrichError> {
            Err(EnrichError::Failed {
                enricher: "broken".to_string(),
                message: "upstream unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_catalog_metadata_album_and_artist() {
        let meta = metadata();
        let hit = meta.enrich(&request(Some("al9"), None)).unwrap().unwrap();
        assert_eq!(hit.album_name.as_deref(), Some("Far Album"));
        assert_eq!(hit.album_type.as_deref(), Some("single"));
        // Artist found through the album.
        assert_eq!(hit.genres.as_deref(), Some("jazz"));
        assert_eq!(hit.artist_image.as_deref(), Some("http://img/ar9"));
    }

    #[test]
    fn test_catalog_metadata_artist_only_and_miss() {
        let meta = metadata();
        let artist_only = meta.enrich(&request(Some("nope"), Some("ar9"))).unwrap().unwrap();
        assert_eq!(artist_only.album_name, None);
        assert_eq!(artist_only.genres.as_deref(), Some("jazz"));

        assert_eq!(meta.enrich(&request(None, None)).unwrap(), None);
    }

    #[test]
    fn test_bounded_enricher_passes_results_through() {
        let bounded = BoundedEnricher::new(metadata(), Duration::from_secs(5)).unwrap();
        let hit = bounded.enrich(&request(Some("al9"), None)).unwrap();
        assert!(hit.is_some());
    }

    struct ThreadRecorder(Arc<Mutex<Vec<thread::ThreadId>>>);

    impl MetadataEnricher for ThreadRecorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn enrich(&self, _request: &EnrichmentRequest) -> Result<Option<Enrichment>, EnrichError> {
            self.0.lock().unwrap().push(thread::current().id());
            Ok(None)
        }
    }

    #[test]
    fn test_bounded_enricher_reuses_one_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bounded = BoundedEnricher::new(ThreadRecorder(Arc::clone(&seen)), Duration::from_secs(5)).unwrap();
        for _ in 0..3 {
            assert_eq!(bounded.enrich(&request(None, None)).unwrap(), None);
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|id| *id == seen[0]));
        assert_ne!(seen[0], thread::current().id());
    }

    #[test]
    fn test_bounded_enricher_times_out() {
        let bounded = BoundedEnricher::new(Slow, Duration::from_millis(20)).unwrap();
        let err = bounded.enrich(&request(None, None)).unwrap_err();
        assert!(matches!(err, EnrichError::TimedOut { timeout_ms: 20, .. }));
    }

    #[test]
    fn test_best_effort_counts_failures() {
        let mut stats = RebuildStats::default();
        assert_eq!(enrich_best_effort(&Broken, &request(None, None), &mut stats), None);
        assert_eq!(stats.enrichment_failures, 1);

        let bounded = BoundedEnricher::new(Slow, Duration::from_millis(20)).unwrap();
        assert_eq!(enrich_best_effort(&bounded, &request(None, None), &mut stats), None);
        assert_eq!(stats.enrichment_failures, 2);

        assert!(enrich_best_effort(&metadata(), &request(Some("al9"), None), &mut stats).is_some());
        assert_eq!(stats.enrichment_hits, 1);
    }
}
