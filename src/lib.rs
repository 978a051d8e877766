//! Unified play statistics engine - shared modules for the CLI and tests.

pub mod aggregate;
pub mod canonical;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fuzzy;
pub mod lock;
pub mod logging;
pub mod materialize;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod safety;
pub mod schema;
pub mod source;
pub mod store;
