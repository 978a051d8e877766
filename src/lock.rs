//! Single-rebuild lease.
//!
//! A lease is a `<output>.lock` file created with `create_new`, so only one
//! process can hold it. It records who took it and when; a lease older than
//! the configured age is treated as left behind by a crashed pass and taken
//! over. A takeover renames the old file to a private sibling first and
//! only discards it if it still holds the stale content. The file is removed
//! when the lease is dropped.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::models::Timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseInfo {
    pub pid: u32,
    pub acquired_at: Timestamp,
}

#[derive(Debug)]
pub struct RebuildLease {
    path: PathBuf,
}

/// `<output>.lock`
pub fn lease_path(output: &Path) -> PathBuf {
    let mut name: OsString = output.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

impl RebuildLease {
    /// `Ok(None)` when a live lease is held by someone else.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Option<Self>> {
        if let Some(lease) = Self::try_create(path)? {
            return Ok(Some(lease));
        }

        let Some((seen, age)) = read_lease(path)? else {
            // Released meanwhile.
            return Self::try_create(path);
        };
        if age < stale_after {
            tracing::info!(lease = %path.display(), age_secs = age.as_secs(), "rebuild already in progress");
            return Ok(None);
        }

        tracing::warn!(lease = %path.display(), age_secs = age.as_secs(), "taking over stale rebuild lease");
        Self::take_over(path, &seen)
    }

    /// Move the lease file aside and only discard it when it still holds
    /// `seen`, the stale content the decision was made on. Another pass may
    /// have replaced it in between; that lease is put back untouched.
    fn take_over(path: &Path, seen: &str) -> Result<Option<Self>> {
        let claim = claim_path(path);
        match fs::rename(path, &claim) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::try_create(path),
            Err(e) => return Err(e).with_context(|| format!("Failed to move stale lease {:?}", path)),
        }

        let moved = fs::read_to_string(&claim).unwrap_or_default();
        if moved != seen {
            // hard_link never clobbers a lease created after the rename.
            if let Err(e) = fs::hard_link(&claim, path) {
                tracing::warn!(lease = %path.display(), error = %e, "failed to restore live rebuild lease");
            }
            let _ = fs::remove_file(&claim);
            tracing::info!(lease = %path.display(), "stale lease was already taken over");
            return Ok(None);
        }

        fs::remove_file(&claim).with_context(|| format!("Failed to remove stale lease {:?}", claim))?;
        Self::try_create(path)
    }

    fn try_create(path: &Path) -> Result<Option<Self>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to create lease {:?}", path)),
        };
        let lease = Self {
            path: path.to_path_buf(),
        };

        let info = LeaseInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        serde_json::to_writer(&mut file, &info)?;
        file.flush()?;
        Ok(Some(lease))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RebuildLease {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lease = %self.path.display(), error = %e, "failed to release rebuild lease");
        }
    }
}

/// Raw content and age of the lease. Age comes from the recorded
/// `acquired_at`, falling back to the file's mtime when the content is
/// unreadable. `None` when the lease vanished meanwhile.
fn read_lease(path: &Path) -> Result<Option<(String, Duration)>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read lease {:?}", path)),
    };

    if let Ok(info) = serde_json::from_str::<LeaseInfo>(&text) {
        let age = (Utc::now() - info.acquired_at).to_std().unwrap_or(Duration::ZERO);
        return Ok(Some((text, age)));
    }

    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat lease {:?}", path)),
    };
    let age = SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);
    Ok(Some((text, age)))
}

static CLAIM_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<lease>.<pid>.<seq>.stale`, unique per takeover attempt.
fn claim_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(format!(
        ".{}.{}.stale",
        std::process::id(),
        CLAIM_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(name)
}
