//! Safety checks run before a pass touches the output location.
//!
//! Publishing replaces the output file, so a mistyped path must never point
//! at the source database.

use anyhow::{bail, Result};
use std::path::Path;

/// Pattern every output file name must contain.
pub const OUTPUT_PATTERN: &str = "unified";

/// Validates that an output path is safe to replace.
///
/// Checks:
/// - Output filename must contain `required_pattern`
/// - Output cannot be any of `source_paths`, compared after resolving symlinks
///   and relative components when the files exist
/// - Output cannot be named like the engine's own staging or lock files
pub fn validate_output_path(output: &Path, required_pattern: &str, source_paths: &[&Path]) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.contains(required_pattern) {
        bail!(
            "Safety check failed: output file '{}' must contain '{}' in the name",
            output.display(),
            required_pattern
        );
    }

    for suffix in [".staging", ".lock"] {
        if output_name.ends_with(suffix) {
            bail!(
                "Safety check failed: output '{}' uses the reserved suffix '{}'",
                output.display(),
                suffix
            );
        }
    }

    let resolved_output = output.canonicalize().ok();
    for source in source_paths {
        let same = output == *source
            || matches!((&resolved_output, source.canonicalize().ok()), (Some(a), Some(b)) if *a == b);
        if same {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_output() {
        let output = PathBuf::from("/tmp/unified_tracks.sqlite3");
        let source = PathBuf::from("/data/music.sqlite3");
        assert!(validate_output_path(&output, OUTPUT_PATTERN, &[&source]).is_ok());
    }

    #[test]
    fn test_missing_pattern() {
        let output = PathBuf::from("/tmp/output.sqlite3");
        let source = PathBuf::from("/data/source.sqlite3");
        let result = validate_output_path(&output, OUTPUT_PATTERN, &[&source]);
        assert!(result.unwrap_err().to_string().contains("must contain 'unified'"));
    }

    #[test]
    fn test_output_equals_source() {
        let path = PathBuf::from("/data/unified.sqlite3");
        let result = validate_output_path(&path, OUTPUT_PATTERN, &[&path]);
        assert!(result.unwrap_err().to_string().contains("cannot be the same as source"));
    }

    #[test]
    fn test_output_equals_source_through_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("unified_source.sqlite3");
        std::fs::write(&source, b"").unwrap();
        let sneaky = dir.path().join(".").join("unified_source.sqlite3");

        assert!(validate_output_path(&sneaky, OUTPUT_PATTERN, &[&source]).is_err());
    }

    #[test]
    fn test_reserved_suffix_blocked() {
        let source = PathBuf::from("/data/music.sqlite3");
        let output = PathBuf::from("/tmp/unified.sqlite3.staging");
        assert!(validate_output_path(&output, OUTPUT_PATTERN, &[&source]).is_err());
    }
}
