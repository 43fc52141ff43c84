//! Chunked write-back of a track list into new playlists.
//!
//! The track list is split into playlists of at most `max_playlist_size`
//! tracks, each filled with write calls of at most `max_tracks_per_write`
//! IDs.  After every write the playlist's track count is re-read from the
//! service and compared with what it should be; a shortfall is logged and
//! recorded but never rolled back.
//!
//! The expected count for the next batch starts from the count the service
//! *reported*, not from a running sum, so earlier shortfalls are not chased.
//! `strict` mode re-sends a short batch once before moving on.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::models::{PlaylistId, PlaylistRecord, TrackId, TrackRecord};
use crate::rate_limiter::Pacer;
use crate::reconcile::unique_track_ids;
use crate::services::PlaylistService;

/// Deezer caps playlists at 2000 tracks.
pub const MAX_PLAYLIST_SIZE: usize = 2000;
/// Deezer accepts at most 50 track IDs per add request.
pub const MAX_TRACKS_PER_WRITE: usize = 50;

/// Limits and pacing for the write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub max_playlist_size: usize,
    pub max_tracks_per_write: usize,
    /// Pause after every write call, in milliseconds.
    pub write_delay_ms: u64,
    /// Cooldown after every Nth playlist (0 disables it).
    pub cooldown_every: usize,
    pub cooldown_secs: u64,
    /// Re-send a batch once when verification shows it came up short.
    pub strict: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            max_playlist_size: MAX_PLAYLIST_SIZE,
            max_tracks_per_write: MAX_TRACKS_PER_WRITE,
            write_delay_ms: 1000,
            cooldown_every: 3,
            cooldown_secs: 60,
            strict: false,
        }
    }
}

impl SyncOptions {
    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// A write batch whose verified count did not match the expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub playlist_id: PlaylistId,
    /// 0-based index of the batch within its playlist.
    pub batch_index: usize,
    pub expected: usize,
    pub actual: usize,
    pub track_ids: Vec<TrackId>,
}

impl Discrepancy {
    /// Tracks missing from the playlist (0 if the service reported more).
    pub fn shortfall(&self) -> usize {
        self.expected.saturating_sub(self.actual)
    }
}

/// What a sync actually produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Created playlists with their last verified track count.
    pub playlists: Vec<PlaylistRecord>,
    pub discrepancies: Vec<Discrepancy>,
    pub failed_writes: usize,
    pub failed_playlists: usize,
}

impl SyncReport {
    pub fn playlist_ids(&self) -> Vec<PlaylistId> {
        self.playlists.iter().map(|p| p.id).collect()
    }

    pub fn tracks_written(&self) -> usize {
        self.playlists.iter().map(|p| p.track_count).sum()
    }
}

/// `"{prefix}-{index:02}"` with a 1-based index.
pub fn playlist_title(prefix: &str, index: usize) -> String {
    format!("{}-{:02}", prefix, index)
}

/// Writes track lists into new playlists on a [`PlaylistService`].
pub struct PlaylistSync<'a, S: PlaylistService + ?Sized> {
    service: &'a mut S,
    pacer: &'a mut dyn Pacer,
    options: SyncOptions,
}

impl<'a, S: PlaylistService + ?Sized> PlaylistSync<'a, S> {
    pub fn new(service: &'a mut S, pacer: &'a mut dyn Pacer, options: SyncOptions) -> Self {
        PlaylistSync {
            service,
            pacer,
            options,
        }
    }

    /// Create playlists named after `name_prefix` holding `tracks`.
    /// Repeated track IDs are written once.
    pub fn sync(&mut self, tracks: &[TrackRecord], name_prefix: &str) -> SyncReport {
        let ids = unique_track_ids(tracks);
        let mut report = SyncReport::default();
        if ids.is_empty() {
            return report;
        }

        let playlist_size = self.options.max_playlist_size.max(1);
        let chunks: Vec<&[TrackId]> = ids.chunks(playlist_size).collect();
        info!(
            "writing {} tracks into {} playlist(s) named '{}-NN'",
            ids.len(),
            chunks.len(),
            name_prefix
        );

        for (index, chunk) in chunks.iter().enumerate() {
            let title = playlist_title(name_prefix, index + 1);
            match self.service.create_playlist(&title) {
                Ok(playlist_id) => {
                    info!(
                        "created playlist '{}' ({}) for {} tracks",
                        title,
                        playlist_id,
                        chunk.len()
                    );
                    let track_count = self.fill_playlist(playlist_id, chunk, &mut report);
                    report.playlists.push(PlaylistRecord {
                        id: playlist_id,
                        title,
                        track_count,
                    });
                }
                Err(err) => {
                    error!("could not create playlist '{}': {}", title, err);
                    report.failed_playlists += 1;
                }
            }

            let done = index + 1;
            if self.options.cooldown_every > 0
                && done % self.options.cooldown_every == 0
                && done < chunks.len()
            {
                self.pacer.pause(
                    self.options.cooldown(),
                    &format!("cooldown after {} playlists", done),
                );
            }
        }

        info!(
            "sync finished: {} playlist(s), {} tracks verified, {} discrepancies",
            report.playlists.len(),
            report.tracks_written(),
            report.discrepancies.len()
        );
        report
    }

    /// Write `ids` in batches, verifying after each one.  Returns the last
    /// count the service reported.
    fn fill_playlist(
        &mut self,
        playlist_id: PlaylistId,
        ids: &[TrackId],
        report: &mut SyncReport,
    ) -> usize {
        let batch_size = self.options.max_tracks_per_write.max(1);
        let batches: Vec<&[TrackId]> = ids.chunks(batch_size).collect();
        let mut baseline = 0usize;

        for (batch_index, batch) in batches.iter().enumerate() {
            info!(
                "adding batch {}/{} to playlist {}",
                batch_index + 1,
                batches.len(),
                playlist_id
            );
            let expected = baseline + batch.len();
            let mut actual = self.write_and_verify(playlist_id, batch, expected, report);

            if actual < expected && self.options.strict {
                warn!(
                    "re-sending batch {} of playlist {} ({} missing)",
                    batch_index + 1,
                    playlist_id,
                    expected - actual
                );
                actual = self.write_and_verify(playlist_id, batch, expected, report);
            }

            if actual != expected {
                let discrepancy = Discrepancy {
                    playlist_id,
                    batch_index,
                    expected,
                    actual,
                    track_ids: batch.to_vec(),
                };
                warn!(
                    "playlist {} has {} tracks after batch {}, expected {} (shortfall {}); batch IDs: {:?}",
                    playlist_id,
                    actual,
                    batch_index + 1,
                    expected,
                    discrepancy.shortfall(),
                    discrepancy.track_ids
                );
                report.discrepancies.push(discrepancy);
            }
            baseline = actual;
        }
        baseline
    }

    /// One write call, the write delay, then a re-read of the track count.
    /// If the re-read fails the expectation is assumed to hold.
    fn write_and_verify(
        &mut self,
        playlist_id: PlaylistId,
        batch: &[TrackId],
        expected: usize,
        report: &mut SyncReport,
    ) -> usize {
        if let Err(err) = self.service.add_tracks(playlist_id, batch) {
            warn!("adding {} tracks to playlist {} failed: {}", batch.len(), playlist_id, err);
            report.failed_writes += 1;
        }
        self.pacer.pause(self.options.write_delay(), "write delay");

        match self.service.get_playlist(playlist_id) {
            Ok(playlist) => playlist.track_count,
            Err(err) => {
                warn!("could not verify playlist {}: {}", playlist_id, err);
                expected
            }
        }
    }
}

/// Playlists whose title starts with any of `prefixes`.
pub fn find_by_prefix<S: PlaylistService + ?Sized>(
    service: &mut S,
    prefixes: &[String],
) -> Result<Vec<PlaylistRecord>> {
    let playlists = service.list_playlists()?;
    Ok(playlists
        .into_iter()
        .filter(|p| prefixes.iter().any(|prefix| p.title.starts_with(prefix.as_str())))
        .collect())
}

/// Delete every playlist whose title starts with any of `prefixes`.
/// Individual delete failures are logged and skipped; returns what was
/// deleted.
pub fn delete_by_prefix<S: PlaylistService + ?Sized>(
    service: &mut S,
    prefixes: &[String],
) -> Result<Vec<PlaylistRecord>> {
    let matching = find_by_prefix(service, prefixes)?;
    let mut deleted = Vec::with_capacity(matching.len());
    for playlist in matching {
        match service.delete_playlist(playlist.id) {
            Ok(()) => {
                info!("deleted playlist '{}' ({})", playlist.title, playlist.id);
                deleted.push(playlist);
            }
            Err(err) => warn!(
                "could not delete playlist '{}' ({}): {}",
                playlist.title, playlist.id, err
            ),
        }
    }
    Ok(deleted)
}
