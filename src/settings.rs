use std::path::{Path, PathBuf};

use tracing::debug;

use crate::chart::DEFAULT_CHART_URL;
use crate::reviews::DEFAULT_FEED_URL;
use crate::{Error, Result};

const DEFAULT_DISCOVERY_URL: &str = "https://gateway.watsonplatform.net/discovery/api";
const DEFAULT_ENVIRONMENT_NAME: &str = "byod";
const DEFAULT_CONFIGURATION_NAME: &str = "json_config";
const DEFAULT_CHECKPOINT_PATH: &str = "ingested_apps.txt";
const DEFAULT_APPS_TO_INGEST: usize = 10;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub url: String,
    pub version: String,
    pub username: String,
    pub password: String,
    pub environment_name: String,
    pub configuration_name: String,
    pub collection_name: String,
}

impl DiscoverySettings {
    /// Only the analytics service keys, for commands that never touch the database.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let settings = Self::collect(&lookup, &mut missing);
        ensure_present(&missing)?;
        Ok(settings)
    }

    fn collect<L>(lookup: &L, missing: &mut Vec<&'static str>) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        Self {
            url: or_default(lookup, "DISCOVERY_URL", DEFAULT_DISCOVERY_URL),
            version: required(lookup, "DISCOVERY_VERSION", missing),
            username: required(lookup, "DISCOVERY_USERNAME", missing),
            password: required(lookup, "DISCOVERY_PASSWORD", missing),
            environment_name: or_default(lookup, "DISCOVERY_ENVIRONMENT", DEFAULT_ENVIRONMENT_NAME),
            configuration_name: or_default(lookup, "DISCOVERY_CONFIGURATION", DEFAULT_CONFIGURATION_NAME),
            collection_name: required(lookup, "COLLECTION_NAME", missing),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudantSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl CloudantSettings {
    /// Only the document database keys.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let settings = Self::collect(&lookup, &mut missing);
        ensure_present(&missing)?;
        Ok(settings)
    }

    fn collect<L>(lookup: &L, missing: &mut Vec<&'static str>) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        Self {
            url: required(lookup, "CLOUDANT_URL", missing),
            username: required(lookup, "CLOUDANT_USERNAME", missing),
            password: required(lookup, "CLOUDANT_PASSWORD", missing),
            database: required(lookup, "DATABASE_NAME", missing),
        }
    }
}

/// Everything the pipeline reads from the environment, resolved once at start up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub discovery: DiscoverySettings,
    pub cloudant: CloudantSettings,
    pub chart_url: String,
    pub feed_url: String,
    pub checkpoint_path: PathBuf,
    pub apps_to_ingest: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from any key lookup. Every missing required key is
    /// reported in one [`Error::Configuration`].
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let discovery = DiscoverySettings::collect(&lookup, &mut missing);
        let cloudant = CloudantSettings::collect(&lookup, &mut missing);
        ensure_present(&missing)?;

        let apps_to_ingest = match value(&lookup, "APPS_TO_INGEST") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                Error::Configuration(format!("APPS_TO_INGEST must be a number, got {raw:?}"))
            })?,
            None => DEFAULT_APPS_TO_INGEST,
        };

        Ok(Self {
            discovery,
            cloudant,
            chart_url: or_default(&lookup, "CHART_URL", DEFAULT_CHART_URL),
            feed_url: or_default(&lookup, "REVIEWS_FEED_URL", DEFAULT_FEED_URL),
            checkpoint_path: PathBuf::from(or_default(&lookup, "CHECKPOINT_PATH", DEFAULT_CHECKPOINT_PATH)),
            apps_to_ingest,
        })
    }
}

/// Reads `.env` from the working directory or its ancestors into the
/// environment. Variables already set win. No file is fine.
pub fn load_dotenv() -> Result<()> {
    match dotenv::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "Loaded environment file");
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Configuration(format!(".env file: {e}"))),
    }
}

/// [`load_dotenv`] for a file at a known path.
pub fn load_dotenv_from(path: &Path) -> Result<()> {
    match dotenv::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Configuration(format!("{}: {e}", path.display()))),
    }
}

/// Blank values count as missing.
fn value<L: Fn(&str) -> Option<String>>(lookup: &L, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn required<L>(lookup: &L, key: &'static str, missing: &mut Vec<&'static str>) -> String
where
    L: Fn(&str) -> Option<String>,
{
    value(lookup, key).unwrap_or_else(|| {
        missing.push(key);
        String::new()
    })
}

fn or_default<L: Fn(&str) -> Option<String>>(lookup: &L, key: &str, default: &str) -> String {
    value(lookup, key).unwrap_or_else(|| default.to_string())
}

fn ensure_present(missing: &[&str]) -> Result<()> {
    if missing.is_empty() {
        return Ok(());
    }
    Err(Error::Configuration(format!(
        "missing environment variables: {}",
        missing.join(", ")
    )))
}
