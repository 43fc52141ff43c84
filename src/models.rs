//! Plain value types shared by the fetchers, the reconciliation engine and
//! the playlist sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Track ID as assigned by the destination service.
pub type TrackId = u64;

/// Playlist ID as assigned by the destination service.
pub type PlaylistId = u64;

/// Separator between artist and title inside a [`TrackIdentifier`].
pub const IDENTIFIER_SEPARATOR: &str = " - ";

/// A track as seen by the destination service.
///
/// Two records from the same source are the same track when their
/// `source_id` matches.  Records from different sources are only ever
/// compared on `(artist_name, title)` through the fuzzy matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRecord {
    pub source_id: TrackId,
    pub artist_name: String,
    pub album_name: String,
    pub title: String,
}

impl TrackRecord {
    pub fn new(
        source_id: TrackId,
        artist_name: impl Into<String>,
        album_name: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        TrackRecord {
            source_id,
            artist_name: artist_name.into(),
            album_name: album_name.into(),
            title: title.into(),
        }
    }

    /// The `(artist, title)` pair used for matching.
    ///
    /// Fails when either field is blank, which happens for records that came
    /// out of an old cache or a partially populated API response.
    pub fn identity(&self) -> Result<(&str, &str)> {
        let artist = self.artist_name.trim();
        let title = self.title.trim();
        if artist.is_empty() {
            return Err(Error::InvalidTrack(format!(
                "track {} has no artist name",
                self.source_id
            )));
        }
        if title.is_empty() {
            return Err(Error::InvalidTrack(format!(
                "track {} has no title",
                self.source_id
            )));
        }
        Ok((artist, title))
    }

    pub fn identifier(&self) -> TrackIdentifier {
        TrackIdentifier::new(&self.artist_name, &self.title)
    }
}

/// `"{artist} - {title}"`, the comparison key for listening history.
///
/// The original casing is kept for display.  Equality and hashing ignore
/// case, so a set of identifiers holds one entry per
/// [`TrackIdentifier::normalized`] form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackIdentifier(String);

impl TrackIdentifier {
    pub fn new(artist: &str, title: &str) -> Self {
        TrackIdentifier(format!("{}{}{}", artist, IDENTIFIER_SEPARATOR, title))
    }

    /// Wrap an already formatted `"artist - title"` string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        TrackIdentifier(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form used for every comparison.
    pub fn normalized(&self) -> String {
        self.folded().collect()
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().flat_map(char::to_lowercase)
    }
}

impl PartialEq for TrackIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.folded().eq(other.folded())
    }
}

impl Eq for TrackIdentifier {}

impl Hash for TrackIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.folded() {
            c.hash(state);
        }
    }
}

impl fmt::Display for TrackIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A playlist on the destination service.
///
/// `track_count` always comes from the service after a mutation and is
/// never computed locally: writes may silently drop entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub id: PlaylistId,
    pub title: String,
    pub track_count: usize,
}
