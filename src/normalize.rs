//! Text normalization for approximate track identity.
//!
//! Deliberately narrow: case folding, diacritic stripping, punctuation
//! folding and whitespace collapsing. No title rewriting (remaster tags,
//! featured artists, ...): two titles only match if they are the same words.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Regex to collapse any whitespace run into a single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Strip diacritics via NFKD decomposition and lower-case.
/// e.g., "Beyoncé" → "beyonce", "Motörhead" → "motorhead"
pub fn fold_diacritics(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Fold typographic quotes to their ASCII forms.
pub fn normalize_punctuation(s: &str) -> String {
    s.replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
}

/// Normalize a title or artist name into a comparison key.
pub fn normalize_key(s: &str) -> String {
    let folded = fold_diacritics(&normalize_punctuation(s));
    MULTI_SPACE.replace_all(folded.trim(), " ").into_owned()
}

/// Key for (title, artist) lookups. `None` when either side is missing or
/// normalizes to nothing, since an empty key must never match.
pub fn match_key(title: Option<&str>, artist: Option<&str>) -> Option<(String, String)> {
    let title = normalize_key(title?);
    let artist = normalize_key(artist?);
    if title.is_empty() || artist.is_empty() {
        return None;
    }
    Some((title, artist))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_diacritics() {
        assert_eq!(fold_diacritics("Björk"), "bjork");
        assert_eq!(fold_diacritics("Motörhead"), "motorhead");
        assert_eq!(fold_diacritics("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_normalize_key_collapses_whitespace_and_case() {
        assert_eq!(normalize_key("  Song   Name "), "song name");
        assert_eq!(normalize_key("SONG\tName"), "song name");
        assert_eq!(normalize_key("Café  del Mar"), "cafe del mar");
    }

    #[test]
    fn test_normalize_key_folds_curly_quotes() {
        assert_eq!(normalize_key("Don\u{2019}t Stop"), normalize_key("Don't Stop"));
    }

    #[test]
    fn test_normalize_key_keeps_version_tags() {
        // Narrow matching: a remaster is a different title.
        assert_ne!(normalize_key("Song (2011 Remaster)"), normalize_key("Song"));
    }

    #[test]
    fn test_match_key_requires_both_sides() {
        assert_eq!(
            match_key(Some("Song"), Some("Band")),
            Some(("song".to_string(), "band".to_string()))
        );
        assert_eq!(match_key(None, Some("Band")), None);
        assert_eq!(match_key(Some("Song"), Some("   ")), None);
    }
}
