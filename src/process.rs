use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::checkpoint::{clear_checkpoint, read_checkpoint, write_checkpoint};
use crate::chart::fetch_top_apps;
use crate::cloudant::DocumentStore;
use crate::details::{clean_keywords, parse_app_page, to_ascii};
use crate::discovery::{Insights, ReviewSink};
use crate::model::{AppDocument, AppSummary, Review, ReviewDocument};
use crate::request::Fetch;
use crate::reviews::extract_reviews;
use crate::settings::Settings;
use crate::{info_time, Result};

const UPLOAD_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const VERIFY_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chart_url: String,
    pub feed_url: String,
    pub checkpoint_path: PathBuf,
    /// Stop after this many apps with at least one review.
    pub app_count: usize,
    pub upload_attempts: usize,
    pub retry_delay: Duration,
}

impl IngestOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chart_url: settings.chart_url.clone(),
            feed_url: settings.feed_url.clone(),
            checkpoint_path: settings.checkpoint_path.clone(),
            app_count: settings.apps_to_ingest,
            upload_attempts: UPLOAD_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub apps: Vec<AppSummary>,
    pub uploaded: usize,
    pub lost: usize,
}

/// Grabs the chart, then uploads the reviews of the first `app_count` apps that
/// have any. The checkpoint is rewritten after every finished app.
pub async fn ingest_top_apps<F, S>(fetcher: &F, sink: &S, options: &IngestOptions) -> Result<IngestReport>
where
    F: Fetch,
    S: ReviewSink,
{
    let start_time = Local::now();
    clear_checkpoint(&options.checkpoint_path).await?;

    info_time!("Grabbing top apps...");
    let top_apps = fetch_top_apps(fetcher, &options.chart_url).await?;

    let mut report = IngestReport::default();
    for app in top_apps {
        if report.apps.len() >= options.app_count {
            break;
        }
        if !app.has_id() {
            warn!(title = %app.title, url = %app.url, "No app id in chart link. Skipping app");
            continue;
        }

        info_time!("Extracting reviews for app {}", app.title);
        let reviews = match extract_reviews(fetcher, &options.feed_url, &app.title, &app.id).await {
            Ok(reviews) => reviews,
            Err(e) => {
                warn!(title = %app.title, error = %e, "Couldn't read the reviews feed. Skipping app");
                continue;
            }
        };
        if reviews.is_empty() {
            info!(title = %app.title, "No reviews found. Skipping app");
            continue;
        }

        let upload_start = Local::now();
        let total = reviews.len();
        for (num, review) in reviews.iter().enumerate() {
            info!("Uploading review {} out of {}.", num + 1, total);
            if upload_review(sink, review, options).await {
                report.uploaded += 1;
            } else {
                report.lost += 1;
            }
        }
        info_time!(upload_start, "Uploaded {} reviews for {}", total, app.title);

        let title = app.title.clone();
        report.apps.push(app);
        write_checkpoint(&options.checkpoint_path, &report.apps).await?;
        info_time!("######## Uploaded app {}: {} ########", report.apps.len(), title);
    }

    info_time!(
        start_time,
        "Ingested {} apps, {} reviews uploaded, {} lost",
        report.apps.len(),
        report.uploaded,
        report.lost
    );
    Ok(report)
}

/// Tries a review up to `upload_attempts` times. Returns whether it made it.
async fn upload_review<S: ReviewSink>(sink: &S, review: &Review, options: &IngestOptions) -> bool {
    let doc = match ReviewDocument::try_from(review) {
        Ok(doc) => doc,
        Err(e) => {
            error!(app = %review.app_name, review_id = %review.review_id, error = %e, "Review lost");
            return false;
        }
    };

    let attempts = options.upload_attempts.max(1);
    for attempt in 1..=attempts {
        match sink.add_review(&doc).await {
            Ok(()) => return true,
            Err(e) => {
                warn!(attempt, review_id = doc.review_id, error = %e, "Adding document caused error");
                if attempt < attempts {
                    sleep(options.retry_delay).await;
                }
            }
        }
    }
    error!(app = %review.app_name, review_id = doc.review_id, attempts, "Review lost");
    false
}

#[derive(Debug, Clone)]
pub struct DetailOptions {
    pub checkpoint_path: PathBuf,
    /// Pause between documents of the verification listing.
    pub verify_delay: Duration,
}

impl DetailOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            checkpoint_path: settings.checkpoint_path.clone(),
            verify_delay: VERIFY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetailReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    /// Everything in the database after the upload.
    pub documents: Vec<Value>,
}

/// Uploads one [`AppDocument`] per checkpointed app, then lists the database.
pub async fn upload_app_details<F, I, D>(
    fetcher: &F,
    insights: &I,
    store: &D,
    options: &DetailOptions,
) -> Result<DetailReport>
where
    F: Fetch,
    I: Insights,
    D: DocumentStore,
{
    let start_time = Local::now();
    let apps = read_checkpoint(&options.checkpoint_path).await?;
    store.ensure_database().await?;

    let mut report = DetailReport::default();
    for app in apps {
        match upload_app(fetcher, insights, store, &app).await {
            Ok(()) => {
                info!(id = %app.id, title = %app.title, "Uploaded app details");
                report.uploaded.push(app.id);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(id = %app.id, title = %app.title, error = %e, "Skipping app");
                report.skipped.push(app.id);
            }
        }
    }
    info_time!(
        start_time,
        "Uploaded details of {} apps, skipped {}",
        report.uploaded.len(),
        report.skipped.len()
    );

    // Check all documents made it, without hammering the database.
    for document in store.list_documents().await? {
        info!(document = %document, "Stored");
        report.documents.push(document);
        sleep(options.verify_delay).await;
    }
    Ok(report)
}

async fn upload_app<F, I, D>(fetcher: &F, insights: &I, store: &D, app: &AppSummary) -> Result<()>
where
    F: Fetch,
    I: Insights,
    D: DocumentStore,
{
    let html = fetcher.fetch(&app.url).await?;
    let page = parse_app_page(&html)?;

    // Reviews were stored under the raw chart title.
    let keywords = insights.top_keywords(&app.title).await?;
    let turnarounds = insights.turnaround_count(&app.title).await?;
    let sentiment = insights.average_sentiment(&app.title).await?;

    let doc = AppDocument {
        name: to_ascii(&app.title),
        keyword: clean_keywords(&app.title, &page.category, &keywords),
        turnarounds,
        sentiment,
        description: page.description,
        image: page.image,
        category: page.category,
        rating: page.rating,
        total_reviews: page.total_reviews,
    };
    store.upsert(&app.id, &doc).await
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::Error;

    /// Fails the first `failures` uploads.
    struct FlakySink {
        failures: RefCell<usize>,
        added: RefCell<Vec<i64>>,
    }

    impl ReviewSink for FlakySink {
        async fn add_review(&self, review: &ReviewDocument) -> Result<()> {
            let mut failures = self.failures.borrow_mut();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::upload("collection", "503 Service Unavailable"));
            }
            self.added.borrow_mut().push(review.review_id);
            Ok(())
        }
    }

    fn review(id: &str) -> Review {
        Review {
            app_name: "Super Chat".into(),
            review_id: id.into(),
            updated: "2017-03-02T10:11:12-07:00".into(),
            rating: 2,
            version: "2.1".into(),
            title: "t".into(),
            review: "r".into(),
        }
    }

    fn options(attempts: usize) -> IngestOptions {
        IngestOptions {
            chart_url: "http://chart".into(),
            feed_url: "http://feed".into(),
            checkpoint_path: PathBuf::from("unused.txt"),
            app_count: 10,
            upload_attempts: attempts,
            retry_delay: Duration::ZERO,
        }
    }

    fn sink(failures: usize) -> FlakySink {
        FlakySink {
            failures: RefCell::new(failures),
            added: RefCell::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn upload_retries_until_success() {
        let sink = sink(2);
        assert!(upload_review(&sink, &review("7"), &options(3)).await);
        assert_eq!(*sink.added.borrow(), vec![7]);
    }

    #[tokio::test]
    async fn upload_gives_up_after_bounded_attempts() {
        let sink = sink(5);
        assert!(!upload_review(&sink, &review("7"), &options(3)).await);
        assert_eq!(*sink.failures.borrow(), 2);
        assert!(sink.added.borrow().is_empty());
    }

    #[tokio::test]
    async fn review_with_unusable_id_is_lost_without_upload() {
        let sink = sink(0);
        assert!(!upload_review(&sink, &review("tag:abc"), &options(3)).await);
        assert!(sink.added.borrow().is_empty());
    }
}
