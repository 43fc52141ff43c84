//! Fuzzy track identity.
//!
//! Decides whether two `"artist - title"` strings from independent catalogs
//! denote the same recording.  Scores are percentages (0–100) of an
//! indel-based edit similarity:
//!
//! ```text
//! score = round(100 * (len(a) + len(b) - indel_distance(a, b)) / (len(a) + len(b)))
//! ```
//!
//! where the indel distance only counts insertions and deletions, i.e.
//! `len(a) + len(b) - 2 * lcs(a, b)`.
//!
//! History entries keep their character vectors, and the looked-up track
//! is prepared once, so a scan over the history allocates nothing per
//! comparison.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::{TrackIdentifier, IDENTIFIER_SEPARATOR};
use crate::normalize::normalize_title;

/// Longest input (in characters) [`try_similarity`] will score.
pub const MAX_COMPARE_CHARS: usize = 4096;

/// Match thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityThresholds {
    /// Artist similarity for duplicate detection among favorites.
    pub artist_threshold: u8,
    /// Title similarity for duplicate detection among favorites.
    pub track_threshold: u8,
    /// Whole `"artist - title"` similarity against history.
    pub combined_threshold: u8,
    /// Title similarity for the title-anchored history match.
    pub title_only_threshold: u8,
    /// Artist similarity required alongside a title-anchored match.
    pub title_only_artist_threshold: u8,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        SimilarityThresholds {
            artist_threshold: 90,
            track_threshold: 90,
            combined_threshold: 85,
            title_only_threshold: 90,
            title_only_artist_threshold: 70,
        }
    }
}

/// Similarity of two strings after lower-casing both.
///
/// Returns `None` when either input is longer than [`MAX_COMPARE_CHARS`];
/// the quadratic comparison is refused rather than attempted.
pub fn try_similarity(a: &str, b: &str) -> Option<u8> {
    Pattern::new(a).score(&lowercase_chars(b))
}

/// Like [`try_similarity`], scoring refused comparisons as 0.
pub fn similarity(a: &str, b: &str) -> u8 {
    try_similarity(a, b).unwrap_or(0)
}

/// Per-character lower-casing, the same folding as [`TrackIdentifier::normalized`].
fn lowercase_chars(text: &str) -> Vec<char> {
    text.chars().flat_map(char::to_lowercase).collect()
}

fn ratio(matched: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = matched as f64 / total as f64;
    (ratio * 100.0).round_ties_even() as u8
}

/// Longest common subsequence length, two-row dynamic programming.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

const WORD_BITS: usize = u64::BITS as usize;

/// Per-character position masks of a pattern of at most 64 characters.
#[derive(Debug, Clone)]
struct CharMasks {
    ascii: [u64; 128],
    other: HashMap<char, u64>,
}

impl CharMasks {
    fn new(pattern: &[char]) -> Self {
        let mut masks = CharMasks {
            ascii: [0; 128],
            other: HashMap::new(),
        };
        for (i, &c) in pattern.iter().enumerate() {
            let bit = 1u64 << i;
            if c.is_ascii() {
                masks.ascii[c as usize] |= bit;
            } else {
                *masks.other.entry(c).or_default() |= bit;
            }
        }
        masks
    }

    fn get(&self, c: char) -> u64 {
        if c.is_ascii() {
            self.ascii[c as usize]
        } else {
            self.other.get(&c).copied().unwrap_or(0)
        }
    }

    /// Bit-parallel LCS (Hyyrö): one word operation per character of `text`.
    fn lcs_len(&self, pattern_len: usize, text: &[char]) -> usize {
        let mut s = u64::MAX;
        for &c in text {
            let u = s & self.get(c);
            s = s.wrapping_add(u) | s.wrapping_sub(u);
        }
        let valid = if pattern_len == WORD_BITS {
            u64::MAX
        } else {
            (1u64 << pattern_len) - 1
        };
        (!s & valid).count_ones() as usize
    }
}

/// Lower-cased text prepared once and scored against many others.
///
/// Patterns of up to 64 characters use the bit-parallel LCS; longer ones
/// fall back to the table.
#[derive(Debug, Clone)]
struct Pattern {
    chars: Vec<char>,
    masks: Option<Box<CharMasks>>,
}

impl Pattern {
    fn new(text: &str) -> Self {
        let chars = lowercase_chars(text);
        let masks = (!chars.is_empty() && chars.len() <= WORD_BITS)
            .then(|| Box::new(CharMasks::new(&chars)));
        Pattern { chars, masks }
    }

    fn lcs_len(&self, other: &[char]) -> usize {
        match &self.masks {
            Some(masks) => masks.lcs_len(self.chars.len(), other),
            None => lcs_len(&self.chars, other),
        }
    }

    fn refuses(&self, other: &[char]) -> bool {
        self.chars.len() > MAX_COMPARE_CHARS || other.len() > MAX_COMPARE_CHARS
    }

    /// Score against already lower-cased `other`.
    fn score(&self, other: &[char]) -> Option<u8> {
        if self.refuses(other) {
            return None;
        }
        Some(ratio(
            2 * self.lcs_len(other),
            self.chars.len() + other.len(),
        ))
    }

    /// Whether the score against `other` reaches `threshold`.  Pairs whose
    /// lengths alone cap the score below it are rejected without an LCS.
    fn reaches(&self, other: &[char], threshold: u8) -> Option<bool> {
        if self.refuses(other) {
            return None;
        }
        let total = self.chars.len() + other.len();
        if ratio(2 * self.chars.len().min(other.len()), total) < threshold {
            return Some(false);
        }
        Some(ratio(2 * self.lcs_len(other), total) >= threshold)
    }
}

/// A listening-history entry with its comparison forms precomputed.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub identifier: TrackIdentifier,
    /// Lower-cased full identifier.
    pub normalized: String,
    chars: Vec<char>,
    /// `(artist, title)`, when the identifier contains `" - "`.
    part_chars: Option<(Vec<char>, Vec<char>)>,
}

impl HistoryEntry {
    pub fn new(identifier: TrackIdentifier) -> Self {
        let normalized = identifier.normalized();
        let chars = normalized.chars().collect();
        let part_chars = normalized
            .split_once(IDENTIFIER_SEPARATOR)
            .map(|(artist, title)| (artist.chars().collect(), title.chars().collect()));
        HistoryEntry {
            identifier,
            normalized,
            chars,
            part_chars,
        }
    }
}

/// The track being looked up, prepared once per lookup.
struct Query {
    text: String,
    full: Pattern,
    parts: Option<(Pattern, Pattern)>,
}

impl Query {
    fn new(text: String, parts: Option<(&str, &str)>) -> Self {
        Query {
            full: Pattern::new(&text),
            parts: parts.map(|(artist, title)| (Pattern::new(artist), Pattern::new(title))),
            text,
        }
    }
}

/// Lookup structure over listening history.
///
/// Reconciliation only needs an exact-membership test and a candidate list
/// for fuzzy comparison.  [`HistorySet`] returns every entry as a
/// candidate; an index that narrows candidates (by title prefix, say) can
/// replace it for very large histories.
pub trait HistoryIndex {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the lower-cased identifier is present verbatim.
    fn contains_normalized(&self, normalized: &str) -> bool;

    /// Entries worth a fuzzy comparison against `(artist, title)`.
    fn candidates<'a>(
        &'a self,
        artist: &str,
        title: &str,
    ) -> Box<dyn Iterator<Item = &'a HistoryEntry> + 'a>;
}

/// Full-scan history index.
#[derive(Debug, Clone, Default)]
pub struct HistorySet {
    entries: Vec<HistoryEntry>,
    exact: HashSet<String>,
}

impl HistorySet {
    pub fn new<I>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = TrackIdentifier>,
    {
        let mut set = HistorySet::default();
        for identifier in identifiers {
            let entry = HistoryEntry::new(identifier);
            if set.exact.insert(entry.normalized.clone()) {
                set.entries.push(entry);
            }
        }
        set
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

impl HistoryIndex for HistorySet {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains_normalized(&self, normalized: &str) -> bool {
        self.exact.contains(normalized)
    }

    fn candidates<'a>(
        &'a self,
        _artist: &str,
        _title: &str,
    ) -> Box<dyn Iterator<Item = &'a HistoryEntry> + 'a> {
        Box::new(self.entries.iter())
    }
}

/// Favorites already kept, prepared for the duplicate check.
#[derive(Debug, Clone, Default)]
pub struct KeptTracks {
    /// Lower-cased artist and version-normalized title.
    entries: Vec<(Vec<char>, Vec<char>)>,
}

impl KeptTracks {
    pub fn new() -> Self {
        KeptTracks::default()
    }

    pub fn push(&mut self, artist: &str, title: &str) {
        self.entries
            .push((lowercase_chars(artist), lowercase_chars(&normalize_title(title))));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fuzzy matcher configured with a set of thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackMatcher {
    thresholds: SimilarityThresholds,
}

impl TrackMatcher {
    pub fn new(thresholds: SimilarityThresholds) -> Self {
        TrackMatcher { thresholds }
    }

    pub fn thresholds(&self) -> &SimilarityThresholds {
        &self.thresholds
    }

    /// Whether two identifiers denote the same track: exact
    /// (case-insensitive), whole-string fuzzy, then title-anchored fuzzy.
    pub fn is_same_track(&self, a: &TrackIdentifier, b: &TrackIdentifier) -> bool {
        let entry = HistoryEntry::new(b.clone());
        let a_norm = a.normalized();
        if a_norm == entry.normalized {
            return true;
        }
        let parts = a_norm.split_once(IDENTIFIER_SEPARATOR);
        let query = Query::new(a_norm.clone(), parts);
        self.fuzzy_matches(&query, &entry)
    }

    /// Whether `(artist, title)` appears in the listening history.
    pub fn is_recently_played(&self, artist: &str, title: &str, history: &dyn HistoryIndex) -> bool {
        let candidate = TrackIdentifier::new(artist, title).normalized();
        if history.contains_normalized(&candidate) {
            return true;
        }

        let artist = artist.to_lowercase();
        let title = title.to_lowercase();
        let query = Query::new(candidate, Some((artist.as_str(), title.as_str())));
        history
            .candidates(&artist, &title)
            .any(|entry| self.fuzzy_matches(&query, entry))
    }

    /// Steps 2 and 3 of the match: whole-string, then title-anchored.
    fn fuzzy_matches(&self, query: &Query, entry: &HistoryEntry) -> bool {
        if self.whole_string_matches(query, entry) {
            return true;
        }

        let (Some((artist, title)), Some((entry_artist, entry_title))) =
            (&query.parts, &entry.part_chars)
        else {
            return false;
        };
        match title.reaches(entry_title, self.thresholds.title_only_threshold) {
            Some(true) => {}
            Some(false) => return false,
            None => {
                debug!("title comparison refused for '{}'", entry.identifier);
                return false;
            }
        }
        match artist.reaches(entry_artist, self.thresholds.title_only_artist_threshold) {
            Some(true) => {
                debug!("title match: '{}' ~ '{}'", query.text, entry.identifier);
                true
            }
            Some(false) => false,
            None => {
                debug!("artist comparison refused for '{}'", entry.identifier);
                false
            }
        }
    }

    fn whole_string_matches(&self, query: &Query, entry: &HistoryEntry) -> bool {
        match query.full.reaches(&entry.chars, self.thresholds.combined_threshold) {
            Some(true) => {
                debug!("fuzzy match: '{}' ~ '{}'", query.text, entry.identifier);
                true
            }
            Some(false) => false,
            None => {
                debug!("comparison refused for '{}'", entry.identifier);
                false
            }
        }
    }

    /// Strict, symmetric duplicate test between two favorites: artist and
    /// version-normalized title must both clear their thresholds.
    pub fn is_duplicate(&self, artist: &str, title: &str, other_artist: &str, other_title: &str) -> bool {
        let mut other = KeptTracks::new();
        other.push(other_artist, other_title);
        self.duplicates_kept(artist, title, &other)
    }

    /// Whether `(artist, title)` duplicates any favorite in `kept`.
    pub fn duplicates_kept(&self, artist: &str, title: &str, kept: &KeptTracks) -> bool {
        let artist = Pattern::new(artist);
        let title = Pattern::new(&normalize_title(title));
        kept.entries.iter().any(|(kept_artist, kept_title)| {
            artist.reaches(kept_artist, self.thresholds.artist_threshold) == Some(true)
                && title.reaches(kept_title, self.thresholds.track_threshold) == Some(true)
        })
    }
}
