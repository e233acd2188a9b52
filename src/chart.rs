//! The public "top free apps" chart.

use chrono::Local;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};

use crate::model::{AppSummary, NOT_FOUND_ID};
use crate::request::Fetch;
use crate::{info_time, Error, Result};

pub const DEFAULT_CHART_URL: &str = "http://www.apple.com/itunes/charts/free-apps/";

const CHART_ENTRY: &str = "div.section-content ul li h3 a";

lazy_static! {
    static ref ID_FINDER: Regex = Regex::new(r"/id([0-9]+)").unwrap();
}

/// Fetches the chart page and returns every listed app in chart order.
pub async fn fetch_top_apps<F: Fetch>(fetcher: &F, chart_url: &str) -> Result<Vec<AppSummary>> {
    let start_time = Local::now();
    let html = fetcher.fetch(chart_url).await?;
    let apps = parse_chart(&html)?;
    info_time!(start_time, "Grabbed {} apps from the chart", apps.len());
    Ok(apps)
}

/// Extracts an [`AppSummary`] from every chart anchor, preserving page order.
pub fn parse_chart(html: &str) -> Result<Vec<AppSummary>> {
    let doc = Html::parse_document(html);
    let entry_selector = create_selector(CHART_ENTRY)?;

    let apps: Vec<AppSummary> = doc
        .select(&entry_selector)
        .map(|anchor| {
            let url = anchor.value().attr("href").unwrap_or_default().to_string();
            AppSummary {
                id: extract_id(&url),
                title: anchor.text().collect::<String>().trim().to_string(),
                url,
            }
        })
        .collect();
    // A chart without entries means the page moved or changed its layout.
    if apps.is_empty() {
        return Err(Error::ParseMissingSelector(CHART_ENTRY.into()));
    }
    Ok(apps)
}

/// Digits following `/id` in the link, or [`NOT_FOUND_ID`].
pub fn extract_id(link: &str) -> String {
    ID_FINDER
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| NOT_FOUND_ID.to_string(), |m| m.as_str().to_string())
}

#[inline]
pub(crate) fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"
        <html><body>
        <div class="section-content">
          <ul>
            <li><h3><a href="https://itunes.apple.com/us/app/super-chat/id1111?mt=8">Super Chat</a></h3></li>
            <li><h3><a href="https://itunes.apple.com/us/app/photo-box/id2222?mt=8"> Photo Box </a></h3></li>
            <li><h3><a href="https://example.com/no-id">Mystery</a></h3></li>
          </ul>
        </div>
        <div class="sidebar"><ul><li><h3><a href="/id9999">Not Charted</a></h3></li></ul></div>
        </body></html>
    "#;

    #[test]
    fn parses_entries_in_page_order() {
        let apps = parse_chart(CHART).unwrap();
        let titles: Vec<_> = apps.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, ["Super Chat", "Photo Box", "Mystery"]);
        assert_eq!(apps[0].id, "1111");
        assert_eq!(apps[1].id, "2222");
        assert_eq!(
            apps[0].url,
            "https://itunes.apple.com/us/app/super-chat/id1111?mt=8"
        );
    }

    #[test]
    fn missing_id_yields_sentinel() {
        let apps = parse_chart(CHART).unwrap();
        assert_eq!(apps[2].id, NOT_FOUND_ID);
        assert_eq!(extract_id(""), NOT_FOUND_ID);
    }

    #[test]
    fn page_without_entries_is_an_error() {
        for html in ["<html><body><h1>Page moved</h1></body></html>", "not html at all {{{"] {
            let err = parse_chart(html).unwrap_err();
            assert!(matches!(err, Error::ParseMissingSelector(ref sel) if sel == CHART_ENTRY));
        }
    }
}
