//! Crate-wide error type.
//!
//! Only [`Error::Config`] is meant to abort a run.  Every other variant is
//! caught somewhere in the pipeline and turned into a degraded result
//! (partial crawl, cache miss, skipped track, recorded discrepancy).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not parse config: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Could not write config: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("{service} API error: {message}")]
    Api { service: String, message: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid track record: {0}")]
    InvalidTrack(String),
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

impl Error {
    pub fn api(service: &str, message: impl Into<String>) -> Self {
        Error::Api {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Whether the remote side asked us to slow down (HTTP 429 or a
    /// service-specific quota or rate-limit error).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Http(err) => matches!(**err, ureq::Error::Status(429, _)),
            Error::Api { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("quota") || message.contains("rate limit")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
