//! One reconciliation run: favorites and history in, playlists out.

use log::{error, info, warn};
use serde::Serialize;

use crate::cache::{CacheKey, CacheLookup, DiskCache};
use crate::error::Result;
use crate::matcher::{HistorySet, SimilarityThresholds, TrackMatcher};
use crate::models::{PlaylistId, TrackRecord};
use crate::rate_limiter::{FixedPause, Pacer};
use crate::reconcile::reconcile;
use crate::services::{FavoritesSource, HistorySource, PlaylistService};
use crate::sync::{PlaylistSync, SyncOptions, SyncReport};

pub const FAVORITES_CACHE_KIND: &str = "deezer_favorites";
pub const TRACK_INFO_CACHE_KIND: &str = "track_info";
const CACHE_IDENTITY: &str = "me";

/// Knobs for a run.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub thresholds: SimilarityThresholds,
    pub sync: SyncOptions,
    /// `None` disables caching of favorites and track info.
    pub cache: Option<DiskCache>,
    /// Ignore fresh cache entries.
    pub refresh: bool,
}

/// Counts from a run, for the final report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub favorites: usize,
    pub history: usize,
    pub unheard: usize,
    pub recently_played: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub sync: SyncReport,
}

impl RunSummary {
    pub fn first_playlist(&self) -> Option<PlaylistId> {
        self.sync.playlists.first().map(|p| p.id)
    }
}

/// Favorites, from a fresh cache entry when there is one.
///
/// A live fetch failure falls back to the stale entry if any, then to an
/// empty list.  Only complete live fetches are written to the cache.
pub fn favorites_with_cache<F>(source: &mut F, cache: Option<&DiskCache>, refresh: bool) -> Vec<TrackRecord>
where
    F: FavoritesSource + ?Sized,
{
    let key = CacheKey::new(FAVORITES_CACHE_KIND, CACHE_IDENTITY);
    let cached = cache.and_then(|c| c.load::<Vec<TrackRecord>>(&key));

    let stale = match cached {
        Some(CacheLookup::Fresh(entry)) if !refresh => {
            info!("using cached favorites ({} tracks)", entry.payload.len());
            return entry.payload;
        }
        Some(lookup) => Some(lookup.into_entry().payload),
        None => None,
    };

    info!("fetching favorites from {}", source.name());
    match source.favorite_tracks() {
        Ok(tracks) => {
            if let Some(cache) = cache {
                cache.save(&key, &tracks);
            }
            tracks
        }
        Err(err) => match stale {
            Some(tracks) => {
                warn!(
                    "fetching favorites failed ({}); using {} cached tracks",
                    err,
                    tracks.len()
                );
                tracks
            }
            None => {
                error!("fetching favorites failed and no cache is available: {}", err);
                Vec::new()
            }
        },
    }
}

/// Reconcile favorites against history and write the unheard ones into
/// playlists named `{playlist_name}-NN`.
///
/// Only a history source failure aborts; everything else degrades into the
/// returned summary.
pub fn run_with_summary<D, H>(
    destination: &mut D,
    history_source: &mut H,
    playlist_name: &str,
    settings: &RunSettings,
    pacer: &mut dyn Pacer,
) -> Result<RunSummary>
where
    D: FavoritesSource + PlaylistService + ?Sized,
    H: HistorySource + ?Sized,
{
    let favorites = favorites_with_cache(destination, settings.cache.as_ref(), settings.refresh);

    info!("loading listening history from {}", history_source.name());
    let history = HistorySet::new(history_source.recent_tracks()?);
    info!(
        "{} favorites, {} distinct history entries",
        favorites.len(),
        history.entries().len()
    );

    let matcher = TrackMatcher::new(settings.thresholds);
    let result = reconcile(&favorites, &history, &matcher);

    if let Some(cache) = &settings.cache {
        cache.save(
            &CacheKey::new(TRACK_INFO_CACHE_KIND, CACHE_IDENTITY),
            &result.track_info,
        );
    }

    let mut summary = RunSummary {
        favorites: favorites.len(),
        history: history.entries().len(),
        unheard: result.unheard.len(),
        recently_played: result.recently_played,
        duplicates: result.duplicates,
        invalid: result.invalid,
        sync: SyncReport::default(),
    };

    if result.unheard.is_empty() {
        info!("no unheard favorites; nothing to write");
        return Ok(summary);
    }

    summary.sync = PlaylistSync::new(destination, pacer, settings.sync.clone())
        .sync(&result.unheard, playlist_name);
    Ok(summary)
}

/// Run with default settings and real pauses.  Returns the first created
/// playlist, or `None` when nothing was unheard or nothing was created.
pub fn run<D, H>(destination: &mut D, history_source: &mut H, playlist_name: &str) -> Result<Option<PlaylistId>>
where
    D: FavoritesSource + PlaylistService + ?Sized,
    H: HistorySource + ?Sized,
{
    let summary = run_with_summary(
        destination,
        history_source,
        playlist_name,
        &RunSettings::default(),
        &mut FixedPause,
    )?;
    Ok(summary.first_playlist())
}
