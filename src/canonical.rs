//! Track identity canonicalization.
//!
//! Resolution is exactly one hop through the curated `track_id_equivalents`
//! table. Entries whose target is itself an alias are rejected at load time,
//! which keeps `canonicalize` idempotent without any cycle detection.

use anyhow::{Context, Result};
use rusqlite::Connection;
use rustc_hash::FxHashMap;

use crate::error::OverrideError;
use crate::models::CatalogEntry;

/// Read-only alias -> canonical id lookup.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceOverrides {
    map: FxHashMap<String, String>,
}

impl EquivalenceOverrides {
    /// Build from (alias, canonical) pairs, validating the whole table.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, OverrideError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map: FxHashMap<String, String> = FxHashMap::default();

        for (alias, canonical) in pairs {
            if alias.trim().is_empty() || canonical.trim().is_empty() {
                return Err(OverrideError::EmptyId { alias, canonical });
            }
            if alias == canonical {
                continue;
            }
            if let Some(first) = map.get(&alias) {
                return Err(OverrideError::DuplicateAlias {
                    second: canonical,
                    first: first.clone(),
                    alias,
                });
            }
            map.insert(alias, canonical);
        }

        // One hop only: a target must not be an alias itself. Report the
        // smallest offending alias so the diagnostic is stable across runs.
        let mut chained: Vec<(&String, &String)> = map
            .iter()
            .filter(|(_, canonical)| map.contains_key(*canonical))
            .collect();
        chained.sort();
        if let Some((alias, canonical)) = chained.first() {
            return Err(OverrideError::ChainedAlias {
                alias: (*alias).clone(),
                canonical: (*canonical).clone(),
                next: map[*canonical].clone(),
            });
        }

        Ok(Self { map })
    }

    /// Load `track_id_equivalents` from the source database.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare(
                "SELECT alias_track_id, canonical_track_id
                 FROM track_id_equivalents
                 ORDER BY alias_track_id, canonical_track_id",
            )
            .context("Failed to query track_id_equivalents")?;

        let pairs = stmt
            .query_map([], |row| {
                let alias: Option<String> = row.get(0)?;
                let canonical: Option<String> = row.get(1)?;
                Ok((alias.unwrap_or_default(), canonical.unwrap_or_default()))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read track_id_equivalents")?;

        Ok(Self::from_pairs(pairs)?)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn target(&self, alias: &str) -> Option<&str> {
        self.map.get(alias).map(String::as_str)
    }
}

/// Resolves raw track ids against an injected override table.
#[derive(Debug, Clone, Copy)]
pub struct Canonicalizer<'a> {
    overrides: &'a EquivalenceOverrides,
}

impl<'a> Canonicalizer<'a> {
    pub fn new(overrides: &'a EquivalenceOverrides) -> Self {
        Self { overrides }
    }

    /// Override target if one exists, else the raw id itself.
    pub fn canonicalize<'s>(&self, raw: &'s str) -> &'s str
    where
        'a: 's,
    {
        self.overrides.target(raw).unwrap_or(raw)
    }

    pub fn is_alias(&self, raw: &str) -> bool {
        self.overrides.target(raw).is_some()
    }
}

/// Pick the single row that represents `canonical_id` among rows collapsing
/// onto it.
///
/// Order: row whose own id already is the canonical id, then latest activity
/// (added_at/liked_at, missing = earliest), then library before liked_only,
/// then smallest raw id. Like/exclusion state of collapsed siblings is folded
/// into the representative.
pub fn select_representative(canonical_id: &str, mut rows: Vec<CatalogEntry>) -> Option<CatalogEntry> {
    rows.sort_by(|a, b| {
        let a_own = a.source_track_id == canonical_id;
        let b_own = b.source_track_id == canonical_id;
        b_own
            .cmp(&a_own)
            .then_with(|| b.activity_at().cmp(&a.activity_at()))
            .then_with(|| a.provenance.cmp(&b.provenance))
            .then_with(|| a.source_track_id.cmp(&b.source_track_id))
    });

    let mut siblings = rows.into_iter();
    let mut representative = siblings.next()?;
    representative.track_id = canonical_id.to_string();

    let liked_on_its_own = representative.is_liked;
    for sibling in siblings {
        if !liked_on_its_own && sibling.is_liked {
            representative.is_liked = true;
            representative.liked_at = representative.liked_at.max(sibling.liked_at);
        }
        representative.is_excluded |= sibling.is_excluded;
    }

    Some(representative)
}
