//! Last.fm listening history via `user.getRecentTracks`.
//!
//! The history window is the last 365 days.  Pages of 200 scrobbles are
//! crawled with a 200 ms pacing delay; the collected identifiers are saved
//! to the disk cache every 5th page and after the last one, so an
//! interrupted crawl still leaves something behind for the next run.

use chrono::{TimeDelta, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::time::Duration;

use crate::cache::{CacheKey, CacheLookup, DiskCache};
use crate::error::{Error, Result};
use crate::models::TrackIdentifier;
use crate::paginate::{fetch_all, Crawl, Page, PageSource};
use crate::rate_limiter::{FixedPause, Pacer, RateLimiter};
use crate::services::HistorySource;

pub const LASTFM_API_URL: &str = "http://ws.audioscrobbler.com/2.0/";

/// Scrobbles per page (the API maximum).
pub const PAGE_LIMIT: u32 = 200;

/// Days of history considered "recently played".
pub const HISTORY_DAYS: i64 = 365;

/// Save the partial history after every Nth page.
pub const SAVE_EVERY_PAGES: u32 = 5;

pub const CACHE_KIND: &str = "lastfm_tracks";

const SERVICE: &str = "Last.fm";

/// 200 ms between page requests, backing off up to 10 s on rate-limit errors.
pub fn create_rate_limiter() -> RateLimiter {
    RateLimiter::new(SERVICE, Duration::from_millis(200), Duration::from_secs(10), 5)
}

// ── API response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    recenttracks: Option<ApiRecentTracks>,
    error: Option<u32>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRecentTracks {
    #[serde(default, deserialize_with = "one_or_many")]
    track: Vec<ApiTrack>,
    #[serde(rename = "@attr")]
    attr: Option<ApiPageAttr>,
}

#[derive(Debug, Deserialize)]
struct ApiPageAttr {
    #[serde(rename = "totalPages", deserialize_with = "lenient_u32")]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    artist: ApiText,
    #[serde(default)]
    name: String,
    #[serde(rename = "@attr")]
    attr: Option<ApiTrackAttr>,
}

#[derive(Debug, Deserialize)]
struct ApiText {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiTrackAttr {
    #[serde(default)]
    nowplaying: Option<String>,
}

impl ApiTrack {
    fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|a| a.nowplaying.as_deref())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Last.fm returns a bare object instead of a list when there is one item.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}

/// Numbers arrive as strings (`"12"`) in most Last.fm responses.
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Num(u32),
        Str(String),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ── Pages ────────────────────────────────────────────────────────────────────

/// One page of recent tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<TrackIdentifier>,
    pub total_pages: u32,
}

/// Parse a `user.getRecentTracks` response body.
///
/// Now-playing entries and entries without artist or title are dropped.  A
/// body without `recenttracks` is a malformed page.
pub fn parse_history_page(body: &str) -> Result<HistoryPage> {
    let response: ApiResponse = serde_json::from_str(body)?;
    if let Some(code) = response.error {
        return Err(Error::api(
            SERVICE,
            format!(
                "error {}: {}",
                code,
                response.message.unwrap_or_default()
            ),
        ));
    }
    let recent = response
        .recenttracks
        .ok_or_else(|| Error::api(SERVICE, "response has no recenttracks"))?;

    let total_pages = recent.attr.map(|a| a.total_pages).unwrap_or(1);
    let items = recent
        .track
        .into_iter()
        .filter(|t| !t.is_now_playing())
        .filter_map(|t| {
            let artist = t.artist.text.trim();
            let title = t.name.trim();
            if artist.is_empty() || title.is_empty() {
                None
            } else {
                Some(TrackIdentifier::new(artist, title))
            }
        })
        .collect();

    Ok(HistoryPage { items, total_pages })
}

/// The client's history for one window, paged by page number.
struct HistoryPages<'a> {
    client: &'a mut LastFmClient,
    from_timestamp: i64,
}

impl PageSource for HistoryPages<'_> {
    type Item = TrackIdentifier;
    type Cursor = u32;

    fn label(&self) -> &str {
        SERVICE
    }

    fn fetch_page(&mut self, page: &u32) -> Result<Page<TrackIdentifier, u32>> {
        let history = self.client.fetch_history_page(self.from_timestamp, *page)?;
        let next = if *page < history.total_pages {
            Some(page + 1)
        } else {
            None
        };
        Ok(Page {
            items: history.items,
            next,
            total_pages: Some(history.total_pages),
        })
    }
}

/// Crawl every page from page 1, saving the history collected so far to
/// `cache` after every [`SAVE_EVERY_PAGES`]th page and after the last one.
fn crawl_with_checkpoints<S>(
    source: &mut S,
    pacer: &mut dyn Pacer,
    cache: Option<&DiskCache>,
    key: &CacheKey,
) -> Crawl<TrackIdentifier>
where
    S: PageSource<Item = TrackIdentifier, Cursor = u32>,
{
    fetch_all(source, 1, pacer, |progress, items| {
        if let Some(cache) = cache {
            if progress.page % SAVE_EVERY_PAGES == 0 || progress.is_last {
                info!("saving {} history entries to cache", items.len());
                cache.save(key, &items);
            }
        }
    })
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct LastFmClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    username: String,
    limiter: RateLimiter,
    cache: Option<DiskCache>,
    refresh: bool,
    history_days: i64,
}

impl LastFmClient {
    pub fn new(api_key: impl Into<String>, username: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .build();
        LastFmClient {
            agent,
            base_url: LASTFM_API_URL.to_string(),
            api_key: api_key.into(),
            username: username.into(),
            limiter: create_rate_limiter(),
            cache: None,
            refresh: false,
            history_days: HISTORY_DAYS,
        }
    }

    pub fn with_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Ignore a fresh cache entry and crawl anyway.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(CACHE_KIND, &self.username)
    }

    /// Fetch one page of scrobbles newer than `from_timestamp` (Unix seconds),
    /// paced by the client's limiter.
    pub fn fetch_history_page(&mut self, from_timestamp: i64, page: u32) -> Result<HistoryPage> {
        self.limiter.wait();
        match self.request_page(from_timestamp, page) {
            Ok(history) => {
                self.limiter.report_success();
                Ok(history)
            }
            Err(err) => {
                if err.is_rate_limited() {
                    self.limiter.report_failure();
                }
                Err(err)
            }
        }
    }

    fn request_page(&self, from_timestamp: i64, page: u32) -> Result<HistoryPage> {
        let response = self
            .agent
            .get(&self.base_url)
            .query("method", "user.getrecenttracks")
            .query("user", &self.username)
            .query("api_key", &self.api_key)
            .query("format", "json")
            .query("limit", &PAGE_LIMIT.to_string())
            .query("from", &from_timestamp.to_string())
            .query("page", &page.to_string())
            .call();

        // Last.fm reports API errors with a JSON body on 4xx responses.
        let body = match response {
            Ok(response) => response.into_string()?,
            Err(ureq::Error::Status(code, response)) if code != 429 => match response.into_string() {
                Ok(body) if body.contains("\"error\"") => body,
                _ => return Err(Error::api(SERVICE, format!("HTTP status {}", code))),
            },
            Err(err) => return Err(err.into()),
        };
        parse_history_page(&body)
    }

    fn crawl(&mut self, from_timestamp: i64, key: &CacheKey) -> Crawl<TrackIdentifier> {
        let cache = self.cache.clone();
        let mut pages = HistoryPages {
            client: self,
            from_timestamp,
        };
        // fetch_history_page paces each request itself.
        crawl_with_checkpoints(&mut pages, &mut FixedPause, cache.as_ref(), key)
    }
}

impl HistorySource for LastFmClient {
    fn name(&self) -> &str {
        SERVICE
    }

    fn recent_tracks(&mut self) -> Result<HashSet<TrackIdentifier>> {
        let key = self.cache_key();
        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load::<Vec<TrackIdentifier>>(&key));

        let stale = match cached {
            Some(CacheLookup::Fresh(entry)) if !self.refresh => {
                info!(
                    "using cached Last.fm history for {} ({} entries)",
                    self.username,
                    entry.payload.len()
                );
                return Ok(entry.payload.into_iter().collect());
            }
            Some(lookup) => Some(lookup.into_entry().payload),
            None => None,
        };

        let from_timestamp = (Utc::now() - TimeDelta::days(self.history_days)).timestamp();
        info!(
            "fetching Last.fm history for {} since {}",
            self.username, from_timestamp
        );
        let crawl = self.crawl(from_timestamp, &key);

        if let Some(err) = &crawl.error {
            if crawl.items.is_empty() {
                if let Some(stale) = stale {
                    warn!(
                        "Last.fm fetch failed ({}); using {} cached entries",
                        err,
                        stale.len()
                    );
                    return Ok(stale.into_iter().collect());
                }
                error!("Last.fm fetch failed with nothing collected: {}", err);
            } else {
                warn!(
                    "Last.fm history is partial ({} entries from {} pages): {}",
                    crawl.items.len(),
                    crawl.pages,
                    err
                );
            }
        }

        if let Some(cache) = &self.cache {
            if !crawl.items.is_empty() || crawl.error.is_none() {
                cache.save(&key, &crawl.items);
            }
        }
        Ok(crawl.items.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paginate::tests::CountingPacer;

    /// Two scrobbles per page; fails on `fail_at`.  Records how many
    /// entries the cache held when each page was requested.
    struct CheckpointPages {
        total_pages: u32,
        fail_at: Option<u32>,
        cache: DiskCache,
        key: CacheKey,
        cached_before: Vec<(u32, usize)>,
    }

    impl CheckpointPages {
        fn new(total_pages: u32, fail_at: Option<u32>, cache: DiskCache) -> Self {
            CheckpointPages {
                total_pages,
                fail_at,
                cache,
                key: CacheKey::new(CACHE_KIND, "someone"),
                cached_before: Vec::new(),
            }
        }
    }

    fn cached_history(cache: &DiskCache, key: &CacheKey) -> Vec<TrackIdentifier> {
        cache
            .load::<Vec<TrackIdentifier>>(key)
            .map(|lookup| lookup.into_entry().payload)
            .unwrap_or_default()
    }

    impl PageSource for CheckpointPages {
        type Item = TrackIdentifier;
        type Cursor = u32;

        fn label(&self) -> &str {
            "checkpoints"
        }

        fn fetch_page(&mut self, page: &u32) -> Result<Page<TrackIdentifier, u32>> {
            let cached = cached_history(&self.cache, &self.key).len();
            self.cached_before.push((*page, cached));
            if self.fail_at == Some(*page) {
                return Err(Error::api(SERVICE, "Operation failed"));
            }
            let items = vec![
                TrackIdentifier::new(&format!("Artist {}", page), "First"),
                TrackIdentifier::new(&format!("Artist {}", page), "Second"),
            ];
            let next = (*page < self.total_pages).then(|| page + 1);
            Ok(Page {
                items,
                next,
                total_pages: Some(self.total_pages),
            })
        }
    }

    #[test]
    fn test_interrupted_crawl_keeps_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let mut source = CheckpointPages::new(10, Some(7), cache.clone());
        let key = source.key.clone();
        let mut pacer = CountingPacer::default();

        let crawl = crawl_with_checkpoints(&mut source, &mut pacer, Some(&cache), &key);

        assert!(crawl.error.is_some());
        assert_eq!(crawl.pages, 6);
        assert_eq!(crawl.items.len(), 12);
        // Nothing is saved before page 5; pages 1-5 are on disk from then on.
        assert_eq!(
            source.cached_before,
            vec![(1, 0), (2, 0), (3, 0), (4, 0), (5, 0), (6, 10), (7, 10)]
        );
        let saved = cached_history(&cache, &key);
        assert_eq!(saved.len(), 10);
        assert!(saved.contains(&TrackIdentifier::new("Artist 5", "Second")));
        assert!(!saved.contains(&TrackIdentifier::new("Artist 6", "First")));
    }

    #[test]
    fn test_complete_crawl_saved_after_last_page() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let mut source = CheckpointPages::new(4, None, cache.clone());
        let key = source.key.clone();
        let mut pacer = CountingPacer::default();

        let crawl = crawl_with_checkpoints(&mut source, &mut pacer, Some(&cache), &key);

        assert!(crawl.is_complete());
        assert_eq!(pacer.waits, 4);
        assert!(source.cached_before.iter().all(|&(_, cached)| cached == 0));
        assert_eq!(cached_history(&cache, &key), crawl.items);
        assert_eq!(crawl.items.len(), 8);
    }

    #[test]
    fn test_crawl_without_cache_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let mut source = CheckpointPages::new(5, None, cache.clone());
        let key = source.key.clone();

        let crawl = crawl_with_checkpoints(&mut source, &mut CountingPacer::default(), None, &key);
        assert_eq!(crawl.items.len(), 10);
        assert!(cached_history(&cache, &key).is_empty());
    }

    #[test]
    fn test_parse_page_with_attributes() {
        let body = r##"{
            "recenttracks": {
                "track": [
                    {"artist": {"mbid": "", "#text": "Radiohead"}, "name": "Nude",
                     "@attr": {"nowplaying": "true"}},
                    {"artist": {"mbid": "", "#text": "Air"}, "name": "Sexy Boy",
                     "date": {"uts": "1700000000", "#text": "14 Nov 2023, 22:13"}},
                    {"artist": {"#text": ""}, "name": "Orphan"}
                ],
                "@attr": {"user": "someone", "page": "1", "perPage": "200",
                          "totalPages": "12", "total": "2400"}
            }
        }"##;
        let page = parse_history_page(body).unwrap();
        assert_eq!(page.total_pages, 12);
        assert_eq!(page.items, vec![TrackIdentifier::new("Air", "Sexy Boy")]);
    }

    #[test]
    fn test_parse_single_track_object() {
        let body = r##"{"recenttracks": {
            "track": {"artist": {"#text": "Björk"}, "name": "Jóga"},
            "@attr": {"totalPages": 1}
        }}"##;
        let page = parse_history_page(body).unwrap();
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.items, vec![TrackIdentifier::new("Björk", "Jóga")]);
    }

    #[test]
    fn test_parse_empty_history() {
        let body = r##"{"recenttracks": {"track": [], "@attr": {"totalPages": "0"}}}"##;
        let page = parse_history_page(body).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_error_body_is_api_error() {
        let body = r#"{"error": 6, "message": "User not found"}"#;
        match parse_history_page(body) {
            Err(Error::Api { service, message }) => {
                assert_eq!(service, "Last.fm");
                assert!(message.contains("User not found"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_recenttracks_is_malformed() {
        assert!(matches!(
            parse_history_page(r#"{"something": "else"}"#),
            Err(Error::Api { .. })
        ));
        assert!(matches!(parse_history_page("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_fresh_cache_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let stored = vec![TrackIdentifier::new("Air", "Sexy Boy")];
        cache.save(&CacheKey::new(CACHE_KIND, "someone"), &stored);

        // An unroutable base URL: any request would fail.
        let mut client = LastFmClient::new("key", "someone")
            .with_cache(cache)
            .with_base_url("http://127.0.0.1:9/");
        let tracks = client.recent_tracks().unwrap();
        assert_eq!(tracks.len(), 1);
        assert!(tracks.contains(&TrackIdentifier::new("Air", "Sexy Boy")));
    }

    #[test]
    fn test_failed_crawl_falls_back_to_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let key = CacheKey::new(CACHE_KIND, "someone");
        let stored = vec![TrackIdentifier::new("Portishead", "Roads")];
        cache.save_at(&key, &stored, Utc::now() - TimeDelta::hours(48));

        let mut client = LastFmClient::new("key", "someone")
            .with_cache(cache.clone())
            .with_base_url("http://127.0.0.1:9/")
            .with_limiter(RateLimiter::unthrottled("test"));
        let tracks = client.recent_tracks().unwrap();
        assert!(tracks.contains(&TrackIdentifier::new("Portishead", "Roads")));

        // The stale entry is not overwritten by the failed crawl.
        let lookup = cache.load::<Vec<TrackIdentifier>>(&key).unwrap();
        assert!(!lookup.is_fresh());
    }
}
