//! APP INSIGHTS
//! Scrapes the top free apps chart, uploads every app's reviews to the
//! analytics collection and stores per app details in the document database.
//!
//! Two steps, run one after the other:
//!  -   `process::ingest_top_apps`: chart -> reviews feed -> analytics collection,
//!      leaving a checkpoint of the ingested apps.
//!  -   `process::upload_app_details`: checkpoint -> store pages + analytics
//!      queries -> document database.

pub mod chart;
pub mod checkpoint;
pub mod cloudant;
pub mod details;
pub mod discovery;
mod error;
mod macros;
pub mod model;
pub mod process;
pub mod query;
pub mod request;
pub mod reviews;
pub mod settings;

pub use error::{Error, Result};
