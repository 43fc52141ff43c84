//! Disk cache for expensive remote fetches (favorites, listening history).
//!
//! One JSON file per `(kind, identity)` key under the cache directory.
//! Each file carries a format version and the time it was written; an
//! entry younger than the TTL (24 h by default) is *fresh*.  Stale entries
//! are still returned so callers can fall back to them when a live fetch
//! fails.
//!
//! Caching is an optimisation only: unreadable, corrupt or version-mismatched
//! files are treated as a miss, and failed writes are logged and dropped.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::error::Result;

/// Bump when the shape of any cached payload changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Default time-to-live.
pub fn default_ttl() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Identifies one cache file: what kind of data and whose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: String,
    pub identity: String,
}

impl CacheKey {
    pub fn new(kind: &str, identity: &str) -> Self {
        CacheKey {
            kind: kind.to_string(),
            identity: identity.to_string(),
        }
    }

    /// File name for this key.  Identity characters outside `[A-Za-z0-9_-]`
    /// are replaced, so a hash of the raw identity keeps distinct
    /// identities apart.
    pub fn file_name(&self) -> String {
        let sanitized: String = self
            .identity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!(
            "{}_{}_{}.json",
            self.kind,
            sanitized,
            &hash_key(&self.identity)[..8]
        )
    }
}

/// 64-bit FNV-1a, hex encoded.  Only used to disambiguate file names.
fn hash_key(data: &str) -> String {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", h)
}

/// A timestamped payload as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub version: u32,
    pub kind: String,
    pub identity: String,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> CacheEntry<T> {
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.timestamp
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        self.age_at(now) < ttl
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone)]
pub enum CacheLookup<T> {
    Fresh(CacheEntry<T>),
    Stale(CacheEntry<T>),
}

impl<T> CacheLookup<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }

    pub fn into_entry(self) -> CacheEntry<T> {
        match self {
            CacheLookup::Fresh(entry) | CacheLookup::Stale(entry) => entry,
        }
    }

    /// The payload only if the entry is fresh.
    pub fn fresh_payload(self) -> Option<T> {
        match self {
            CacheLookup::Fresh(entry) => Some(entry.payload),
            CacheLookup::Stale(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// JSON-file cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    ttl: TimeDelta,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DiskCache {
            dir: dir.into(),
            ttl: default_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheLookup<T>> {
        self.load_at(key, Utc::now())
    }

    /// Read an entry and classify it against `now`.  Any read or decode
    /// failure is a miss.
    pub fn load_at<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Option<CacheLookup<T>> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) => {
                debug!("cache miss for {}: {}", path.display(), err);
                return None;
            }
        };

        match serde_json::from_slice::<VersionHeader>(&data) {
            Ok(header) if header.version == CACHE_FORMAT_VERSION => {}
            Ok(header) => {
                warn!(
                    "ignoring cache {} with format version {} (expected {})",
                    path.display(),
                    header.version,
                    CACHE_FORMAT_VERSION
                );
                return None;
            }
            Err(err) => {
                warn!("ignoring unreadable cache {}: {}", path.display(), err);
                return None;
            }
        }

        let entry: CacheEntry<T> = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("ignoring corrupt cache {}: {}", path.display(), err);
                return None;
            }
        };

        if entry.kind != key.kind || entry.identity != key.identity {
            warn!(
                "ignoring cache {}: written for {}/{}",
                path.display(),
                entry.kind,
                entry.identity
            );
            return None;
        }

        if entry.is_fresh_at(now, self.ttl) {
            Some(CacheLookup::Fresh(entry))
        } else {
            Some(CacheLookup::Stale(entry))
        }
    }

    /// Persist `payload` stamped with the current time.  Best effort.
    pub fn save<T: Serialize>(&self, key: &CacheKey, payload: &T) {
        self.save_at(key, payload, Utc::now());
    }

    pub fn save_at<T: Serialize>(&self, key: &CacheKey, payload: &T, timestamp: DateTime<Utc>) {
        if let Err(err) = self.try_save(key, payload, timestamp) {
            warn!(
                "could not save cache {}: {}",
                self.path_for(key).display(),
                err
            );
        }
    }

    /// Write through a temp file in the same directory and rename it into
    /// place, so an interrupted write never leaves a truncated entry.
    fn try_save<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            version: CACHE_FORMAT_VERSION,
            kind: key.kind.clone(),
            identity: key.identity.clone(),
            timestamp,
            payload,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, &entry)?;
        tmp.flush()?;
        tmp.persist(self.path_for(key)).map_err(|err| err.error)?;
        debug!("saved cache {}", self.path_for(key).display());
        Ok(())
    }
}
