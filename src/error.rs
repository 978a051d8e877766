//! Typed errors for the library seams where callers need to tell failures apart.
//!
//! Pipeline code otherwise propagates `anyhow::Error` with context.

use thiserror::Error;

/// Malformed `track_id_equivalents` content. Any of these aborts the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverrideError {
    #[error("duplicate alias '{alias}' in track_id_equivalents (targets '{first}' and '{second}')")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("empty track id in track_id_equivalents (alias '{alias}', canonical '{canonical}')")]
    EmptyId { alias: String, canonical: String },

    #[error("chained override: '{alias}' -> '{canonical}', but '{canonical}' is itself an alias of '{next}'")]
    ChainedAlias {
        alias: String,
        canonical: String,
        next: String,
    },
}

/// Invalid engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duration_tolerance_ms must be >= 0 (got {0})")]
    NegativeTolerance(i64),

    #[error("skip_ratio must be in (0, 1] (got {0})")]
    SkipRatioOutOfRange(f64),

    #[error("at least one event feed must be configured")]
    NoFeeds,

    #[error("duplicate feed tag '{0}'")]
    DuplicateFeedTag(String),

    #[error("feed table '{0}' is not a plain SQL identifier")]
    InvalidTableName(String),
}

/// Failure of a single metadata enrichment call. Always recoverable.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("enricher '{enricher}' timed out after {timeout_ms} ms")]
    TimedOut { enricher: String, timeout_ms: u64 },

    #[error("enricher '{enricher}' worker disconnected")]
    Disconnected { enricher: String },

    #[error("enricher '{enricher}' failed: {message}")]
    Failed { enricher: String, message: String },
}
