use std::time::Duration;

use reqwest::Client;

use crate::{Error, Result};

const USER_AGENT: &str = concat!("app-insights/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can turn a URL into the text of its response body.
///
/// A response with a non-success status must come back as [`Error::Fetch`],
/// the review feed relies on it to detect the last page.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// [`Fetch`] over plain HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    /// Requests a page and returns the body on success.
    async fn fetch(&self, url: &str) -> Result<String> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                status,
            });
        }
        Ok(res.text().await?)
    }
}
