use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::matcher::SimilarityThresholds;
use crate::sync::SyncOptions;

pub const DEFAULT_PLAYLIST_NAME: &str = "Favorites Not Played in a Year";

pub const DEEZER_TOKEN_ENV: &str = "DEEZER_ACCESS_TOKEN";
pub const LASTFM_API_KEY_ENV: &str = "LASTFM_API_KEY";
pub const LASTFM_USERNAME_ENV: &str = "LASTFM_USERNAME";

/// Settings that can be saved to a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deezer_access_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastfm_api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastfm_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<SimilarityThresholds>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOptions>,
}

impl Config {
    /// Create a new empty config
    pub fn new() -> Self {
        Config::default()
    }

    /// `~/.config/unheard/config.toml`
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("cannot determine the user config directory".into()))?;
        Ok(config_dir.join("unheard").join("config.toml"))
    }

    /// Load config from the default path.  A missing file is an empty config.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Merge this config with another, preferring values from other
    pub fn merge(&mut self, other: &Config) {
        if other.deezer_access_token.is_some() {
            self.deezer_access_token = other.deezer_access_token.clone();
        }
        if other.lastfm_api_key.is_some() {
            self.lastfm_api_key = other.lastfm_api_key.clone();
        }
        if other.lastfm_username.is_some() {
            self.lastfm_username = other.lastfm_username.clone();
        }
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir.clone();
        }
        if other.playlist_name.is_some() {
            self.playlist_name = other.playlist_name.clone();
        }
        if other.thresholds.is_some() {
            self.thresholds = other.thresholds;
        }
        if other.sync.is_some() {
            self.sync = other.sync.clone();
        }
    }

    /// Print the config in a human-readable format.  Secrets are masked.
    pub fn print(&self, title: &str) {
        println!("{}:", title);

        if let Some(token) = &self.deezer_access_token {
            println!("  Deezer token:       {}", mask(token));
        }
        if let Some(key) = &self.lastfm_api_key {
            println!("  Last.fm API key:    {}", mask(key));
        }
        if let Some(username) = &self.lastfm_username {
            println!("  Last.fm user:       {}", username);
        }
        if let Some(dir) = &self.cache_dir {
            println!("  Cache directory:    {}", dir.display());
        }
        if let Some(name) = &self.playlist_name {
            println!("  Playlist name:      {}", name);
        }
        if let Some(t) = &self.thresholds {
            println!(
                "  Thresholds:         combined {}, title {}/artist {}, duplicates {}/{}",
                t.combined_threshold,
                t.title_only_threshold,
                t.title_only_artist_threshold,
                t.artist_threshold,
                t.track_threshold
            );
        }
        if let Some(s) = &self.sync {
            println!(
                "  Sync:               {} per playlist, {} per write, {} ms delay, cooldown {} s every {}{}",
                s.max_playlist_size,
                s.max_tracks_per_write,
                s.write_delay_ms,
                s.cooldown_secs,
                s.cooldown_every,
                if s.strict { ", strict" } else { "" }
            );
        }
    }

    pub fn deezer_access_token(&self) -> Result<String> {
        credential(
            self.deezer_access_token.as_deref(),
            env::var(DEEZER_TOKEN_ENV).ok(),
            DEEZER_TOKEN_ENV,
        )
    }

    pub fn lastfm_api_key(&self) -> Result<String> {
        credential(
            self.lastfm_api_key.as_deref(),
            env::var(LASTFM_API_KEY_ENV).ok(),
            LASTFM_API_KEY_ENV,
        )
    }

    pub fn lastfm_username(&self) -> Result<String> {
        credential(
            self.lastfm_username.as_deref(),
            env::var(LASTFM_USERNAME_ENV).ok(),
            LASTFM_USERNAME_ENV,
        )
    }

    /// Configured cache directory, or `~/.cache/unheard`.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("unheard")
        })
    }

    pub fn playlist_name(&self) -> String {
        self.playlist_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PLAYLIST_NAME.to_string())
    }

    pub fn thresholds(&self) -> SimilarityThresholds {
        self.thresholds.unwrap_or_default()
    }

    pub fn sync_options(&self) -> SyncOptions {
        self.sync.clone().unwrap_or_default()
    }
}

/// Configured value, else the environment, else a config error naming
/// the variable to set.
fn credential(configured: Option<&str>, from_env: Option<String>, env_name: &str) -> Result<String> {
    configured
        .map(str::to_string)
        .or(from_env)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "{} is not configured (set it in the config file or the environment)",
                env_name
            ))
        })
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() > 8 {
        format!("{}…", visible)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_save_and_load_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "lastfm_username = \"someone\"\n\n[thresholds]\ncombined_threshold = 80\n\n[sync]\nstrict = true\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.lastfm_username.as_deref(), Some("someone"));
        let thresholds = config.thresholds();
        assert_eq!(thresholds.combined_threshold, 80);
        assert_eq!(thresholds.title_only_threshold, 90);
        let sync = config.sync_options();
        assert!(sync.strict);
        assert_eq!(sync.max_tracks_per_write, 50);

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config {
            lastfm_username: Some("file-user".into()),
            playlist_name: Some("From File".into()),
            ..Config::new()
        };
        let flags = Config {
            playlist_name: Some("From Flag".into()),
            ..Config::new()
        };
        base.merge(&flags);
        assert_eq!(base.lastfm_username.as_deref(), Some("file-user"));
        assert_eq!(base.playlist_name(), "From Flag");
    }

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.playlist_name(), DEFAULT_PLAYLIST_NAME);
        assert!(config.cache_dir().ends_with("unheard"));
        assert_eq!(config.sync_options(), SyncOptions::default());
    }

    #[test]
    fn test_credential_precedence() {
        assert_eq!(
            credential(Some("from-file"), Some("from-env".into()), "X").unwrap(),
            "from-file"
        );
        assert_eq!(credential(None, Some(" from-env ".into()), "X").unwrap(), "from-env");
        assert!(matches!(credential(None, None, "X"), Err(Error::Config(_))));
        assert!(credential(Some("  "), None, "X").is_err());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abcdefghijkl"), "abcd…");
        assert_eq!(mask("short"), "****");
    }
}
