//! Title normalization for duplicate detection among favorites.
//!
//! Strips markers that name a *release* of a recording rather than a
//! different recording: remasters, editions, radio/album edits, mono/stereo,
//! featured-artist credits.  Live, acoustic and remix markers are kept
//! because those are different performances.

use once_cell::sync::Lazy;
use regex::Regex;

/// Version-marker patterns, applied in order.
static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "- Remastered 2009", "- 2011 Remaster", "/ Remastered"
        Regex::new(r"(?i)\s*[-–—/]\s*(?:remaster(?:ed)?(?:\s+\d{4})?|\d{4}\s+(?:digital\s+)?remaster(?:ed)?)(?:\s+version)?\s*$").unwrap(),
        // "(Remaster)", "[2009 Remastered]", "(Remastered 2015)"
        Regex::new(r"(?i)\s*[\(\[](?:remaster(?:ed)?(?:\s+\d{4})?|\d{4}\s+(?:digital\s+)?remaster(?:ed)?)(?:\s+version)?[\)\]]").unwrap(),
        // "(Deluxe Edition)", "[Anniversary Edition]"
        Regex::new(r"(?i)\s*[\(\[](?:deluxe|super\s+deluxe|expanded|anniversary|special|collector'?s?)(?:\s+edition)?[\)\]]").unwrap(),
        // "(Radio Edit)", "[Album Version]", "(Mono)"
        Regex::new(r"(?i)\s*[\(\[](?:radio\s+edit|single\s+version|album\s+version|original\s+mix|mono|stereo)[\)\]]").unwrap(),
        // "- Radio Edit", "- Single Version", "- Mono"
        Regex::new(r"(?i)\s*[-–—]\s*(?:radio\s+edit|single\s+version|album\s+version|mono|stereo)\s*$").unwrap(),
        // "(feat. Someone)", "[ft. Other]"
        Regex::new(r"(?i)\s*[\(\[](?:feat\.?|ft\.?|featuring)\s+[^)\]]+[\)\]]").unwrap(),
        // "Song feat. Someone"
        Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.+$").unwrap(),
        // "- 2011"
        Regex::new(r"\s*[-–—]\s*\d{4}\s*$").unwrap(),
    ]
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Lower-cased title with version markers removed.
///
/// Falls back to the plain lower-cased title when stripping would leave
/// nothing (a title that *is* a marker, e.g. "(Remastered)").
pub fn normalize_title(title: &str) -> String {
    let mut result = title.to_string();
    for pattern in VERSION_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    let result = MULTI_SPACE.replace_all(result.trim(), " ").to_lowercase();
    if result.is_empty() {
        title.trim().to_lowercase()
    } else {
        result
    }
}
