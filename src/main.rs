use app_insights::cloudant::CloudantClient;
use app_insights::discovery::{DiscoveryClient, DiscoveryCollection};
use app_insights::process::{ingest_top_apps, upload_app_details, DetailOptions, IngestOptions};
use app_insights::request::HttpFetcher;
use app_insights::settings::{load_dotenv, CloudantSettings, DiscoverySettings, Settings};
use app_insights::{info_time, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "app-insights")]
#[command(about = "Scrape top App Store apps and their reviews into Discovery and Cloudant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload the reviews of the top apps and write the checkpoint
    Ingest {
        /// Number of apps with reviews to ingest (overrides APPS_TO_INGEST)
        #[arg(long)]
        count: Option<usize>,
    },
    /// Scrape details of the checkpointed apps into the document database
    Details,
    /// List the apps with reviews in the collection
    Apps,
    /// Keywords of an app with the tone of the reviews mentioning them
    Keywords { app_name: String },
    /// Positive and negative reviews of an app per day
    Timeline { app_name: String },
    /// Positive sounding reviews of an app rated below three stars
    Turnarounds { app_name: String },
    /// Delete the document database
    ResetDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before the subscriber, so RUST_LOG can come from the file too.
    load_dotenv()?;
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let start_time = Local::now();

    match cli.command {
        Command::Ingest { count } => {
            let settings = Settings::from_env()?;
            let mut options = IngestOptions::from_settings(&settings);
            if let Some(count) = count {
                options.app_count = count;
            }
            let collection = collection(&settings.discovery).await?;
            let report = ingest_top_apps(&HttpFetcher::new()?, &collection, &options).await?;
            info_time!(
                "Created collection {} with id {}, {} apps checkpointed to {}",
                settings.discovery.collection_name,
                collection.ids.collection_id,
                report.apps.len(),
                options.checkpoint_path.display()
            );
        }
        Command::Details => {
            let settings = Settings::from_env()?;
            let collection = collection(&settings.discovery).await?;
            let store = CloudantClient::new(&settings.cloudant)?;
            let options = DetailOptions::from_settings(&settings);
            let report = upload_app_details(&HttpFetcher::new()?, &collection, &store, &options).await?;
            print_json(&report.documents)?;
        }
        Command::Apps => print_json(&discovery().await?.app_names().await?)?,
        Command::Keywords { app_name } => {
            print_json(&discovery().await?.keyword_sentiments(&app_name).await?)?
        }
        Command::Timeline { app_name } => {
            print_json(&discovery().await?.sentiment_timeline(&app_name).await?)?
        }
        Command::Turnarounds { app_name } => {
            print_json(&discovery().await?.turnaround_reviews(&app_name).await?)?
        }
        Command::ResetDb => CloudantClient::new(&CloudantSettings::from_env()?)?.delete_database().await?,
    }

    info_time!(start_time, "Full program time:");
    Ok(())
}

/// Report commands only need the analytics service.
async fn discovery() -> Result<DiscoveryCollection> {
    collection(&DiscoverySettings::from_env()?).await
}

async fn collection(settings: &DiscoverySettings) -> Result<DiscoveryCollection> {
    DiscoveryClient::new(settings)?.bootstrap(settings).await
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
