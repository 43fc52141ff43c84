//! Unheard-favorites computation: favorites minus recently played, with
//! near-duplicate favorites collapsed to their first occurrence.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::matcher::{HistoryIndex, HistorySet, KeptTracks, SimilarityThresholds, TrackMatcher};
use crate::models::{TrackId, TrackIdentifier, TrackRecord};

/// `(artist, title)` of every favorite that was examined, keyed by ID.
pub type TrackInfo = BTreeMap<TrackId, (String, String)>;

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Unheard favorites in first-seen order.
    pub unheard: Vec<TrackRecord>,
    pub recently_played: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub track_info: TrackInfo,
}

/// Walk `favorites` in order, dropping anything matched in `history` and
/// anything that duplicates a favorite already kept.
///
/// Cost is O(F × (H + O)) comparisons for F favorites, H history
/// candidates and O kept tracks.
pub fn reconcile(
    favorites: &[TrackRecord],
    history: &dyn HistoryIndex,
    matcher: &TrackMatcher,
) -> Reconciliation {
    let mut result = Reconciliation::default();
    let mut kept = KeptTracks::new();

    for track in favorites {
        let (artist, title) = match track.identity() {
            Ok(identity) => identity,
            Err(err) => {
                warn!("skipping favorite: {}", err);
                result.invalid += 1;
                continue;
            }
        };
        result
            .track_info
            .insert(track.source_id, (artist.to_string(), title.to_string()));

        if matcher.is_recently_played(artist, title, history) {
            result.recently_played += 1;
            continue;
        }

        if matcher.duplicates_kept(artist, title, &kept) {
            result.duplicates += 1;
            continue;
        }

        kept.push(artist, title);
        result.unheard.push(track.clone());
    }

    info!(
        "{} of {} favorites unheard ({} recently played, {} duplicates, {} invalid)",
        result.unheard.len(),
        favorites.len(),
        result.recently_played,
        result.duplicates,
        result.invalid
    );
    result
}

/// Favorites with no fuzzy match in `history`, near-duplicates removed.
pub fn compute_unheard(
    favorites: &[TrackRecord],
    history: &HashSet<TrackIdentifier>,
    thresholds: SimilarityThresholds,
) -> Vec<TrackRecord> {
    let index = HistorySet::new(history.iter().cloned());
    reconcile(favorites, &index, &TrackMatcher::new(thresholds)).unheard
}

/// Track IDs in order with repeats removed.
pub fn unique_track_ids(tracks: &[TrackRecord]) -> Vec<TrackId> {
    let mut seen = HashSet::new();
    tracks
        .iter()
        .map(|t| t.source_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fav(id: TrackId, artist: &str, title: &str) -> TrackRecord {
        TrackRecord::new(id, artist, "Album", title)
    }

    fn history(entries: &[&str]) -> HashSet<TrackIdentifier> {
        entries.iter().map(|e| TrackIdentifier::from_raw(*e)).collect()
    }

    #[test]
    fn test_disjoint_sets_keep_all_favorites() {
        let favorites = vec![
            fav(1, "Air", "Sexy Boy"),
            fav(2, "Portishead", "Glory Box"),
            fav(3, "Massive Attack", "Teardrop"),
        ];
        let hist = history(&["Daft Punk - Around the World", "Björk - Hyperballad"]);
        let unheard = compute_unheard(&favorites, &hist, SimilarityThresholds::default());
        assert_eq!(unheard, favorites);
    }

    #[test]
    fn test_fully_heard_favorites_yield_nothing() {
        let favorites = vec![fav(1, "Air", "Sexy Boy"), fav(2, "Portishead", "Glory Box")];
        let hist = history(&["Air - Sexy Boy", "Portishead - Glory Box", "Other - Song"]);
        assert!(compute_unheard(&favorites, &hist, SimilarityThresholds::default()).is_empty());
    }

    #[test]
    fn test_remaster_duplicate_keeps_first() {
        let favorites = vec![
            fav(10, "Artist A", "Song X"),
            fav(11, "Artist A", "Song X (Remaster)"),
        ];
        let unheard = compute_unheard(&favorites, &HashSet::new(), SimilarityThresholds::default());
        assert_eq!(unheard.len(), 1);
        assert_eq!(unheard[0].source_id, 10);
    }

    #[test]
    fn test_empty_inputs() {
        let unheard = compute_unheard(&[], &history(&["A - B"]), SimilarityThresholds::default());
        assert!(unheard.is_empty());
    }

    #[test]
    fn test_invalid_favorite_is_skipped_not_fatal() {
        let favorites = vec![
            fav(1, "", "Nameless"),
            fav(2, "Air", "Playground Love"),
        ];
        let index = HistorySet::default();
        let result = reconcile(&favorites, &index, &TrackMatcher::default());
        assert_eq!(result.invalid, 1);
        assert_eq!(result.unheard.len(), 1);
        assert_eq!(result.unheard[0].source_id, 2);
        assert!(!result.track_info.contains_key(&1));
    }

    #[test]
    fn test_counts_and_track_info() {
        let favorites = vec![
            fav(1, "Radiohead", "Creep"),
            fav(2, "Radiohead", "Creep"),
            fav(3, "Radiohead", "Nude"),
            fav(4, "The Beatles", "Let It Be"),
        ];
        let index = HistorySet::new(history(&["Beatles - Let It Be"]));
        let result = reconcile(&favorites, &index, &TrackMatcher::default());

        assert_eq!(result.recently_played, 1);
        assert_eq!(result.duplicates, 1);
        let ids: Vec<_> = result.unheard.iter().map(|t| t.source_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(result.track_info.len(), 4);
        assert_eq!(
            result.track_info[&4],
            ("The Beatles".to_string(), "Let It Be".to_string())
        );
    }

    #[test]
    fn test_unique_track_ids_preserves_order() {
        let tracks = vec![fav(3, "a", "b"), fav(1, "c", "d"), fav(3, "e", "f"), fav(2, "g", "h")];
        assert_eq!(unique_track_ids(&tracks), vec![3, 1, 2]);
    }
}
