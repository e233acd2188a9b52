use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // -- Fetch
    #[error("Request to {url} failed with status {status}")]
    Fetch { url: String, status: StatusCode },

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // -- Parse
    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),
    #[error("Couldn't parse {0}")]
    Parse(String),
    #[error("Xml Error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upload
    #[error("Upload to {target} failed: {reason}")]
    Upload { target: String, reason: String },

    // -- Configuration
    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Query value {0:?} contains control characters")]
    InvalidQueryValue(String),

    #[error("No checkpoint at {0}, run `app-insights ingest` first.")]
    MissingCheckpoint(PathBuf),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(what: impl Into<String>) -> Self {
        Error::Parse(what.into())
    }

    pub(crate) fn upload(target: impl Into<String>, reason: impl ToString) -> Self {
        Error::Upload {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors no later step can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
