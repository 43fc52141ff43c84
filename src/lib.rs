pub mod cache;
pub mod config;
pub mod csv_history;
pub mod deezer;
pub mod error;
pub mod lastfm;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod paginate;
pub mod pipeline;
pub mod rate_limiter;
pub mod reconcile;
pub mod services;
pub mod sync;

pub use cache::{CacheKey, CacheLookup, DiskCache};
pub use config::Config;
pub use csv_history::{parse_history_csv, CsvHistory};
pub use deezer::DeezerClient;
pub use error::{Error, Result};
pub use lastfm::LastFmClient;
pub use matcher::{
    similarity, HistoryIndex, HistorySet, KeptTracks, SimilarityThresholds, TrackMatcher,
};
pub use models::{PlaylistId, PlaylistRecord, TrackId, TrackIdentifier, TrackRecord};
pub use paginate::{fetch_all, Crawl, Page, PageSource};
pub use pipeline::{run, run_with_summary, RunSettings, RunSummary};
pub use rate_limiter::{FixedPause, Pacer, RateLimiter};
pub use reconcile::{compute_unheard, reconcile, Reconciliation};
pub use services::{FavoritesSource, HistorySource, PlaylistService};
pub use sync::{delete_by_prefix, find_by_prefix, Discrepancy, PlaylistSync, SyncOptions, SyncReport};
