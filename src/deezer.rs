//! Deezer API client: favorites and playlist management.
//!
//! Every request carries the OAuth `access_token` as a query parameter.
//! Deezer answers errors with HTTP 200 and an `{"error": {...}}` body, so
//! every response body is checked for that envelope before decoding.
//! Error code 4 is the request quota (50 requests / 5 s); it is reported to
//! the rate limiter, which backs off.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{PlaylistId, PlaylistRecord, TrackId, TrackRecord};
use crate::paginate::{fetch_all, Page, PageSource};
use crate::rate_limiter::{Pacer, RateLimiter};
use crate::services::{FavoritesSource, PlaylistService};

pub const DEEZER_API_URL: &str = "https://api.deezer.com";

/// Items per page for collection requests.
pub const PAGE_LIMIT: u32 = 2000;

/// Deezer error code for "quota exceeded".
const QUOTA_ERROR_CODE: u32 = 4;

const SERVICE: &str = "Deezer";

/// 100 ms between requests (Deezer allows 50 per 5 s).
pub fn create_rate_limiter() -> RateLimiter {
    RateLimiter::new(SERVICE, Duration::from_millis(100), Duration::from_secs(10), 10)
}

// ── API response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: u32,
}

#[derive(Debug, Deserialize)]
struct ApiPage<A> {
    #[serde(default = "Vec::new")]
    data: Vec<A>,
    total: Option<u32>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: u64,
    #[serde(default)]
    title: String,
    artist: Option<ApiArtist>,
    album: Option<ApiAlbum>,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    nb_tracks: usize,
}

#[derive(Debug, Deserialize)]
struct ApiCreated {
    id: u64,
}

fn track_from_api(api: ApiTrack) -> Result<TrackRecord> {
    let artist = api.artist.map(|a| a.name).unwrap_or_default();
    let album = api.album.map(|a| a.title).unwrap_or_default();
    let record = TrackRecord::new(api.id, artist, album, api.title);
    record.identity()?;
    Ok(record)
}

fn playlist_from_api(api: ApiPlaylist) -> Result<PlaylistRecord> {
    Ok(PlaylistRecord {
        id: api.id,
        title: api.title,
        track_count: api.nb_tracks,
    })
}

/// Map an `{"error": {...}}` body to [`Error::Api`].  Bodies that are not
/// an error envelope (including bare `true`) pass.
fn check_error(body: &str) -> Result<()> {
    let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) else {
        return Ok(());
    };
    match envelope.error {
        Some(err) if err.code == QUOTA_ERROR_CODE => Err(Error::api(
            SERVICE,
            format!("quota exceeded (code {}): {}", err.code, err.message),
        )),
        Some(err) => Err(Error::api(
            SERVICE,
            format!("{} (code {}): {}", err.error_type, err.code, err.message),
        )),
        None => Ok(()),
    }
}

/// Decode one page of a collection, skipping entries that fail conversion.
fn decode_page<A, T>(
    body: &str,
    label: &str,
    convert: fn(A) -> Result<T>,
) -> Result<Page<T, String>>
where
    A: DeserializeOwned,
{
    let page: ApiPage<A> = serde_json::from_str(body)?;
    let total_pages = page.total.map(|total| total.div_ceil(PAGE_LIMIT));
    let mut items = Vec::with_capacity(page.data.len());
    for raw in page.data {
        match convert(raw) {
            Ok(item) => items.push(item),
            Err(err) => warn!("{}: skipping entry: {}", label, err),
        }
    }
    Ok(Page {
        items,
        next: page.next,
        total_pages,
    })
}

// ── Transport ────────────────────────────────────────────────────────────────

/// Borrowed transport half of the client, so a crawl can hold it while the
/// limiter is lent out as the pacer.
struct DeezerApi<'a> {
    agent: &'a ureq::Agent,
    access_token: &'a str,
}

impl DeezerApi<'_> {
    /// Send a request and return the body after the error-envelope check.
    fn send_raw(&self, method: &str, url: &str, params: &[(&str, &str)]) -> Result<String> {
        debug!("{} {}", method, url);
        let mut request = self.agent.request(method, url);
        // `next` links already carry the token.
        if !url.contains("access_token=") {
            request = request.query("access_token", self.access_token);
        }
        for (name, value) in params {
            request = request.query(name, value);
        }

        let body = match request.call() {
            Ok(response) => response.into_string()?,
            Err(ureq::Error::Status(code, response)) if code != 429 => {
                let body = response.into_string().unwrap_or_default();
                check_error(&body)?;
                return Err(Error::api(SERVICE, format!("HTTP status {}", code)));
            }
            Err(err) => return Err(err.into()),
        };
        check_error(&body)?;
        Ok(body)
    }

    fn send<T: DeserializeOwned>(&self, method: &str, url: &str, params: &[(&str, &str)]) -> Result<T> {
        let body = self.send_raw(method, url, params)?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// A `data`/`next` collection walked with [`fetch_all`].
struct Listing<'a, A, T> {
    api: DeezerApi<'a>,
    label: &'static str,
    convert: fn(A) -> Result<T>,
}

impl<A: DeserializeOwned, T> PageSource for Listing<'_, A, T> {
    type Item = T;
    type Cursor = String;

    fn label(&self) -> &str {
        self.label
    }

    fn fetch_page(&mut self, url: &String) -> Result<Page<T, String>> {
        let body = self.api.send_raw("GET", url, &[])?;
        decode_page(&body, self.label, self.convert)
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct DeezerClient {
    agent: ureq::Agent,
    access_token: String,
    base_url: String,
    limiter: RateLimiter,
}

impl DeezerClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();
        DeezerClient {
            agent,
            access_token: access_token.into(),
            base_url: DEEZER_API_URL.to_string(),
            limiter: create_rate_limiter(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    fn api(&self) -> DeezerApi<'_> {
        DeezerApi {
            agent: &self.agent,
            access_token: &self.access_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// One paced request with success/failure reported to the limiter.
    fn call<T: DeserializeOwned>(&mut self, method: &str, path: &str, params: &[(&str, &str)]) -> Result<T> {
        self.limiter.wait();
        let url = self.url(path);
        let result = self.api().send(method, &url, params);
        match &result {
            Ok(_) => self.limiter.report_success(),
            Err(err) if err.is_rate_limited() => self.limiter.report_failure(),
            Err(_) => {}
        }
        result
    }

    /// Walk a whole collection.  Partial results are an error.
    fn list_all<A: DeserializeOwned, T>(
        &mut self,
        path: &str,
        label: &'static str,
        convert: fn(A) -> Result<T>,
    ) -> Result<Vec<T>> {
        let start = format!("{}?limit={}", self.url(path), PAGE_LIMIT);
        let mut listing = Listing {
            api: DeezerApi {
                agent: &self.agent,
                access_token: &self.access_token,
            },
            label,
            convert,
        };
        fetch_all(&mut listing, start, &mut self.limiter, |_, _| {}).into_complete()
    }
}

impl FavoritesSource for DeezerClient {
    fn name(&self) -> &str {
        SERVICE
    }

    fn favorite_tracks(&mut self) -> Result<Vec<TrackRecord>> {
        self.list_all("/user/me/tracks", "Deezer favorites", track_from_api)
    }
}

impl PlaylistService for DeezerClient {
    fn create_playlist(&mut self, title: &str) -> Result<PlaylistId> {
        let created: ApiCreated = self.call("POST", "/user/me/playlists", &[("title", title)])?;
        Ok(created.id)
    }

    fn get_playlist(&mut self, id: PlaylistId) -> Result<PlaylistRecord> {
        let playlist: ApiPlaylist = self.call("GET", &format!("/playlist/{}", id), &[])?;
        playlist_from_api(playlist)
    }

    fn add_tracks(&mut self, id: PlaylistId, track_ids: &[TrackId]) -> Result<()> {
        let songs = track_ids
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let ok: bool = self.call("POST", &format!("/playlist/{}/tracks", id), &[("songs", &songs)])?;
        if ok {
            Ok(())
        } else {
            Err(Error::api(SERVICE, format!("adding tracks to playlist {} was refused", id)))
        }
    }

    fn delete_playlist(&mut self, id: PlaylistId) -> Result<()> {
        let ok: bool = self.call("DELETE", &format!("/playlist/{}", id), &[])?;
        if ok {
            Ok(())
        } else {
            Err(Error::api(SERVICE, format!("deleting playlist {} was refused", id)))
        }
    }

    fn list_playlists(&mut self) -> Result<Vec<PlaylistRecord>> {
        self.list_all("/user/me/playlists", "Deezer playlists", playlist_from_api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope() {
        assert!(check_error("true").is_ok());
        assert!(check_error(r#"{"id": 12}"#).is_ok());

        let err = check_error(
            r#"{"error": {"type": "OAuthException", "message": "Invalid OAuth access token.", "code": 300}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid OAuth access token."));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_quota_error_is_rate_limited() {
        let err = check_error(
            r#"{"error": {"type": "Exception", "message": "Quota limit exceeded", "code": 4}}"#,
        )
        .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_decode_favorites_page() {
        let body = r#"{
            "data": [
                {"id": 3135556, "title": "Harder, Better, Faster, Stronger",
                 "artist": {"id": 27, "name": "Daft Punk"},
                 "album": {"id": 302127, "title": "Discovery"}, "type": "track"},
                {"id": 42, "title": "", "artist": {"name": "Nobody"}},
                {"id": 43, "title": "No Artist"}
            ],
            "total": 4500,
            "next": "https://api.deezer.com/user/me/tracks?access_token=t&limit=2000&index=2000"
        }"#;
        let page = decode_page(body, "favorites", track_from_api).unwrap();
        assert_eq!(
            page.items,
            vec![TrackRecord::new(
                3135556,
                "Daft Punk",
                "Discovery",
                "Harder, Better, Faster, Stronger"
            )]
        );
        assert_eq!(page.total_pages, Some(3));
        assert!(page.next.unwrap().ends_with("index=2000"));
    }

    #[test]
    fn test_decode_last_playlist_page() {
        let body = r#"{"data": [{"id": 908622995, "title": "Unheard-01", "nb_tracks": 2000}], "total": 1}"#;
        let page = decode_page(body, "playlists", playlist_from_api).unwrap();
        assert_eq!(
            page.items,
            vec![PlaylistRecord {
                id: 908622995,
                title: "Unheard-01".to_string(),
                track_count: 2000,
            }]
        );
        assert_eq!(page.next, None);
    }

    #[test]
    fn test_unreachable_service_fails_favorites() {
        let mut client = DeezerClient::new("token")
            .with_base_url("http://127.0.0.1:9")
            .with_limiter(RateLimiter::unthrottled("test"));
        assert!(client.favorite_tracks().is_err());
    }
}
