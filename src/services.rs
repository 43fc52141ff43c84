//! Interfaces to the remote services the reconciliation engine drives.
//!
//! Implementations live in separate modules:
//!
//! * [`crate::deezer::DeezerClient`] — favorites and playlists
//! * [`crate::lastfm::LastFmClient`] — listening history
//! * [`crate::csv_history::CsvHistory`] — listening history from an export
//!
//! Every implementation converts its wire format into [`TrackRecord`] /
//! [`TrackIdentifier`] / [`PlaylistRecord`] before anything crosses this
//! boundary.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::{PlaylistId, PlaylistRecord, TrackId, TrackIdentifier, TrackRecord};

/// Where the user's recent listening comes from.
pub trait HistorySource {
    /// Short display name, e.g. "Last.fm" or "CSV export".
    fn name(&self) -> &str;

    /// Every `"artist - title"` listened to in the history window.
    ///
    /// Transient failures should be absorbed (returning whatever was
    /// collected); an `Err` here aborts the run.
    fn recent_tracks(&mut self) -> Result<HashSet<TrackIdentifier>>;
}

/// The user's liked tracks on the destination service.
pub trait FavoritesSource {
    fn name(&self) -> &str;

    /// The complete favorites list.  Partial lists are errors: favorites
    /// are cached all-or-nothing.
    fn favorite_tracks(&mut self) -> Result<Vec<TrackRecord>>;
}

/// Playlist operations on the destination service.
pub trait PlaylistService {
    fn create_playlist(&mut self, title: &str) -> Result<PlaylistId>;

    /// Current state of a playlist, including the authoritative track count.
    fn get_playlist(&mut self, id: PlaylistId) -> Result<PlaylistRecord>;

    /// Append tracks.  `track_ids` never exceeds the service's per-request cap.
    fn add_tracks(&mut self, id: PlaylistId, track_ids: &[TrackId]) -> Result<()>;

    fn delete_playlist(&mut self, id: PlaylistId) -> Result<()>;

    /// All of the user's playlists.
    fn list_playlists(&mut self) -> Result<Vec<PlaylistRecord>>;
}
