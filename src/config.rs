//! Engine configuration: optional TOML file, overridden by CLI flags.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Fuzzy duration tolerance
pub const DEFAULT_DURATION_TOLERANCE_MS: i64 = 1000;

/// A play is a skip when the next play starts before this share of its duration.
pub const DEFAULT_SKIP_RATIO: f64 = 0.3;

pub const DEFAULT_ENRICHMENT_TIMEOUT_MS: u64 = 2000;

/// Leases older than this are treated as abandoned (6h).
pub const DEFAULT_LEASE_STALE_AFTER_SECS: u64 = 6 * 60 * 60;

static SQL_IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// One event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedConfig {
    /// Table in the source database.
    Table { tag: String, table: String },
    /// JSON Lines export file.
    JsonLines { tag: String, path: PathBuf },
}

impl FeedConfig {
    pub fn table(name: &str) -> Self {
        FeedConfig::Table {
            tag: name.to_string(),
            table: name.to_string(),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            FeedConfig::Table { tag, .. } | FeedConfig::JsonLines { tag, .. } => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub duration_tolerance_ms: i64,
    pub skip_ratio: f64,
    /// Rayon worker threads, 0 = rayon default
    pub workers: usize,
    pub enrichment_timeout_ms: u64,
    pub lease_stale_after_secs: u64,
    pub feeds: Vec<FeedConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_ms: DEFAULT_DURATION_TOLERANCE_MS,
            skip_ratio: DEFAULT_SKIP_RATIO,
            workers: 0,
            enrichment_timeout_ms: DEFAULT_ENRICHMENT_TIMEOUT_MS,
            lease_stale_after_secs: DEFAULT_LEASE_STALE_AFTER_SECS,
            feeds: vec![
                FeedConfig::table("plays"),
                FeedConfig::table("spotify_play_history"),
                FeedConfig::table("apple_music_play_history"),
            ],
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML config file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_tolerance_ms < 0 {
            return Err(ConfigError::NegativeTolerance(self.duration_tolerance_ms));
        }
        if !(self.skip_ratio > 0.0 && self.skip_ratio <= 1.0) {
            return Err(ConfigError::SkipRatioOutOfRange(self.skip_ratio));
        }
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }

        let mut tags: FxHashSet<&str> = FxHashSet::default();
        for feed in &self.feeds {
            if !tags.insert(feed.tag()) {
                return Err(ConfigError::DuplicateFeedTag(feed.tag().to_string()));
            }
            if let FeedConfig::Table { table, .. } = feed {
                if !SQL_IDENTIFIER.is_match(table) {
                    return Err(ConfigError::InvalidTableName(table.clone()));
                }
            }
        }
        Ok(())
    }
}
