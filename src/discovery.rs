//! Client for the text analytics service (Discovery v1 REST API) holding the
//! uploaded reviews.

use chrono::Local;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use crate::model::{coerce_int, Review, ReviewDocument};
use crate::query::{
    Aggregation, Filter, QueryParams, APP_NAME, DOC_SENTIMENT_SCORE, DOC_SENTIMENT_TYPE,
    KEYWORD_SENTIMENT, KEYWORD_TEXT, RATING, UPDATED,
};
use crate::settings::DiscoverySettings;
use crate::{info_time, Error, Result};

const TURNAROUND_FIELDS: &str = "rating,review,version,app_name,title,updated,review_id";

/// Receives every review the ingestion uploads.
#[allow(async_fn_in_trait)]
pub trait ReviewSink {
    async fn add_review(&self, review: &ReviewDocument) -> Result<()>;
}

/// The per app signals the detail upload asks of the analytics service.
#[allow(async_fn_in_trait)]
pub trait Insights {
    /// Keywords mentioned in the app's reviews, most frequent first.
    async fn top_keywords(&self, app_name: &str) -> Result<Vec<String>>;
    /// Reviews with a positive tone but fewer than three stars.
    async fn turnaround_count(&self, app_name: &str) -> Result<u64>;
    async fn average_sentiment(&self, app_name: &str) -> Result<f64>;
}

/// Identifiers the pipeline works against, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIds {
    pub environment_id: String,
    pub configuration_id: String,
    pub collection_id: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    client: Client,
    base: Url,
    version: String,
    username: String,
    password: String,
}

impl DiscoveryClient {
    pub fn new(settings: &DiscoverySettings) -> Result<Self> {
        let base = Url::parse(&settings.url).map_err(|e| {
            Error::Configuration(format!("DISCOVERY_URL {:?} is invalid: {e}", settings.url))
        })?;
        Ok(Self {
            client: Client::new(),
            base,
            version: settings.version.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Configuration(format!("{} can't be a base url", self.base)))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        url.query_pairs_mut().append_pair("version", &self.version);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let res = self.authed(self.client.get(url.clone())).send().await?;
        Ok(check_fetch(res, &url)?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: Url, body: &Value) -> Result<T> {
        let res = self.authed(self.client.post(url.clone())).json(body).send().await?;
        let status = res.status();
        if !status.is_success() {
            let reason = res.text().await.unwrap_or_default();
            return Err(Error::upload(url.as_str(), format!("{status}: {reason}")));
        }
        Ok(res.json().await?)
    }

    /// Lists `kind`s under `path`, returns the id of the one called `name` or creates it.
    async fn resolve_or_create(
        &self,
        path: &[&str],
        kind: &str,
        name: &str,
        create: Value,
    ) -> Result<String> {
        let id_key = format!("{kind}_id");

        let listing: Value = self.get_json(self.url(path)?).await?;
        if let Some(id) = find_by_name(&listing, kind, name) {
            debug!(kind, name, id, "Found existing");
            return Ok(id.to_string());
        }

        info!(kind, name, "Creating");
        let created: Value = self.post_json(self.url(path)?, &create).await?;
        created[&id_key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::parse(format!("{id_key} from the create {kind} response")))
    }

    /// Resolves environment, configuration and collection by name, creating
    /// whichever doesn't exist yet.
    pub async fn bootstrap(self, settings: &DiscoverySettings) -> Result<DiscoveryCollection> {
        let start_time = Local::now();

        let environment_id = self
            .resolve_or_create(
                &["environments"],
                "environment",
                &settings.environment_name,
                json!({ "name": settings.environment_name, "description": "App review insights" }),
            )
            .await?;
        let configuration_id = self
            .resolve_or_create(
                &["environments", &environment_id, "configurations"],
                "configuration",
                &settings.configuration_name,
                json!({ "name": settings.configuration_name }),
            )
            .await?;
        let collection_id = self
            .resolve_or_create(
                &["environments", &environment_id, "collections"],
                "collection",
                &settings.collection_name,
                json!({
                    "name": settings.collection_name,
                    "configuration_id": configuration_id,
                    "language": "en",
                }),
            )
            .await?;

        let ids = RemoteIds {
            environment_id,
            configuration_id,
            collection_id,
        };
        info_time!(start_time, "Resolved analytics ids: {:?}", ids);
        Ok(DiscoveryCollection { client: self, ids })
    }
}

/// Id of the `kind` called `name` in a listing like `{"environments": [...]}`.
fn find_by_name<'a>(listing: &'a Value, kind: &str, name: &str) -> Option<&'a str> {
    listing[format!("{kind}s")]
        .as_array()?
        .iter()
        .find(|item| item["name"] == name)?[format!("{kind}_id")]
        .as_str()
}

/// A resolved collection; the handle everything after bootstrap talks to.
#[derive(Debug, Clone)]
pub struct DiscoveryCollection {
    client: DiscoveryClient,
    pub ids: RemoteIds,
}

impl DiscoveryCollection {
    fn collection_url(&self, tail: &str) -> Result<Url> {
        self.client.url(&[
            "environments",
            &self.ids.environment_id,
            "collections",
            &self.ids.collection_id,
            tail,
        ])
    }

    pub async fn query(&self, params: &QueryParams) -> Result<QueryResponse> {
        let mut url = self.collection_url("query")?;
        url.query_pairs_mut().extend_pairs(params.pairs());
        self.client.get_json(url).await
    }

    /// Every app name with reviews in the collection.
    pub async fn app_names(&self) -> Result<Vec<String>> {
        let params = QueryParams {
            aggregation: Some(Aggregation::new().term(APP_NAME)),
            ..Default::default()
        };
        app_names_from(&self.query(&params).await?)
    }

    /// Keywords of an app with the tone of the reviews mentioning them.
    pub async fn keyword_sentiments(&self, app_name: &str) -> Result<Vec<KeywordSentiment>> {
        let params = QueryParams {
            aggregation: Some(keyword_aggregation(app_name)?),
            ..Default::default()
        };
        keyword_sentiments_from(&self.query(&params).await?)
    }

    /// Positive and negative review counts per day.
    pub async fn sentiment_timeline(&self, app_name: &str) -> Result<Vec<DailySentiment>> {
        let aggregation = Aggregation::new()
            .filter(&Filter::app(app_name)?)
            .timeslice(UPDATED, "1day")
            .term(DOC_SENTIMENT_TYPE);
        let params = QueryParams {
            aggregation: Some(aggregation),
            ..Default::default()
        };
        timeline_from(&self.query(&params).await?)
    }

    /// The turnaround reviews themselves rather than just their count.
    pub async fn turnaround_reviews(&self, app_name: &str) -> Result<Vec<Review>> {
        let params = QueryParams {
            filter: Some(turnaround_filter(app_name)?),
            return_fields: Some(TURNAROUND_FIELDS),
            ..Default::default()
        };
        Ok(reviews_from(&self.query(&params).await?))
    }
}

impl ReviewSink for DiscoveryCollection {
    async fn add_review(&self, review: &ReviewDocument) -> Result<()> {
        let url = self.collection_url("documents")?;
        let bytes = serde_json::to_vec(review)?;
        let file = Part::bytes(bytes)
            .file_name(format!("review_{}.json", review.review_id))
            .mime_str("application/json")?;
        let form = Form::new().part("file", file);

        let res = self
            .client
            .authed(self.client.client.post(url.clone()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::upload(url.as_str(), e))?;
        let status = res.status();
        if !status.is_success() {
            let reason = res.text().await.unwrap_or_default();
            return Err(Error::upload(url.as_str(), format!("{status}: {reason}")));
        }
        Ok(())
    }
}

impl Insights for DiscoveryCollection {
    async fn top_keywords(&self, app_name: &str) -> Result<Vec<String>> {
        let params = QueryParams {
            aggregation: Some(keyword_aggregation(app_name)?),
            ..Default::default()
        };
        keywords_from(&self.query(&params).await?)
    }

    async fn turnaround_count(&self, app_name: &str) -> Result<u64> {
        let params = QueryParams {
            filter: Some(turnaround_filter(app_name)?),
            return_fields: Some(TURNAROUND_FIELDS),
            ..Default::default()
        };
        Ok(self.query(&params).await?.matching_results)
    }

    async fn average_sentiment(&self, app_name: &str) -> Result<f64> {
        let aggregation = Aggregation::new()
            .filter(&Filter::app(app_name)?)
            .average(DOC_SENTIMENT_SCORE);
        let params = QueryParams {
            aggregation: Some(aggregation),
            ..Default::default()
        };
        average_from(&self.query(&params).await?)
    }
}

fn check_fetch(res: Response, url: &Url) -> Result<Response> {
    let status = res.status();
    if !status.is_success() {
        return Err(Error::Fetch {
            url: url.to_string(),
            status,
        });
    }
    Ok(res)
}

fn keyword_aggregation(app_name: &str) -> Result<Aggregation> {
    Ok(Aggregation::new()
        .filter(&Filter::app(app_name)?)
        .term(KEYWORD_TEXT)
        .term(KEYWORD_SENTIMENT))
}

fn turnaround_filter(app_name: &str) -> Result<Filter> {
    Ok(Filter::app(app_name)?
        .equals(DOC_SENTIMENT_TYPE, "positive")?
        .lt(RATING, 3))
}

// -- Responses

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub matching_results: u64,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub aggregations: Vec<AggregationResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregationResult {
    #[serde(default)]
    pub results: Vec<Bucket>,
    #[serde(default)]
    pub aggregations: Vec<AggregationResult>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bucket {
    pub key: Value,
    #[serde(default)]
    pub matching_results: u64,
    pub key_as_string: Option<String>,
    #[serde(default)]
    pub aggregations: Vec<AggregationResult>,
}

impl Bucket {
    fn key(&self) -> String {
        match &self.key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SentimentCounts {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
}

impl SentimentCounts {
    fn from_buckets(aggregations: &[AggregationResult]) -> Self {
        let mut counts = Self::default();
        let buckets = aggregations.first().map(|a| a.results.as_slice()).unwrap_or_default();
        for bucket in buckets {
            match bucket.key().as_str() {
                "positive" => counts.positive = bucket.matching_results,
                "neutral" => counts.neutral = bucket.matching_results,
                "negative" => counts.negative = bucket.matching_results,
                _ => {}
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordSentiment {
    pub keyword: String,
    #[serde(flatten)]
    pub sentiment: SentimentCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySentiment {
    pub date: String,
    #[serde(flatten)]
    pub sentiment: SentimentCounts,
}

/// The aggregation nested under the leading `filter(..)`.
fn filtered(res: &QueryResponse) -> Result<&AggregationResult> {
    res.aggregations
        .first()
        .and_then(|filter| filter.aggregations.first())
        .ok_or_else(|| Error::parse("nested aggregation in query response"))
}

pub fn keywords_from(res: &QueryResponse) -> Result<Vec<String>> {
    Ok(filtered(res)?.results.iter().map(Bucket::key).collect())
}

pub fn average_from(res: &QueryResponse) -> Result<f64> {
    filtered(res)?
        .value
        .ok_or_else(|| Error::parse("average sentiment value in query response"))
}

pub fn app_names_from(res: &QueryResponse) -> Result<Vec<String>> {
    let terms = res
        .aggregations
        .first()
        .ok_or_else(|| Error::parse("app name aggregation in query response"))?;
    Ok(terms.results.iter().map(Bucket::key).collect())
}

pub fn keyword_sentiments_from(res: &QueryResponse) -> Result<Vec<KeywordSentiment>> {
    Ok(filtered(res)?
        .results
        .iter()
        .map(|bucket| KeywordSentiment {
            keyword: bucket.key(),
            sentiment: SentimentCounts::from_buckets(&bucket.aggregations),
        })
        .collect())
}

pub fn timeline_from(res: &QueryResponse) -> Result<Vec<DailySentiment>> {
    Ok(filtered(res)?
        .results
        .iter()
        .map(|bucket| DailySentiment {
            date: bucket.key_as_string.clone().unwrap_or_else(|| bucket.key()),
            sentiment: SentimentCounts::from_buckets(&bucket.aggregations),
        })
        .collect())
}

/// Query results as reviews; rows without a usable rating are dropped.
pub fn reviews_from(res: &QueryResponse) -> Vec<Review> {
    let text = |row: &Value, key: &str| match &row[key] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    res.results
        .iter()
        .filter_map(|row| {
            let rating = coerce_int(&text(row, "rating")).ok()?;
            Some(Review {
                app_name: text(row, "app_name"),
                review_id: text(row, "review_id"),
                updated: text(row, "updated"),
                rating: u8::try_from(rating).ok()?,
                version: text(row, "version"),
                title: text(row, "title"),
                review: text(row, "review"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    fn settings(url: &str) -> DiscoverySettings {
        DiscoverySettings {
            url: url.into(),
            version: "2017-02-14".into(),
            username: "u".into(),
            password: "p".into(),
            environment_name: "byod".into(),
            configuration_name: "json_config".into(),
            collection_name: "reviews".into(),
        }
    }

    #[test]
    fn urls_carry_version() {
        let client = DiscoveryClient::new(&settings("https://gateway.example.com/discovery/api/")).unwrap();
        let url = client.url(&["environments", "env 1", "collections"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.example.com/discovery/api/v1/environments/env%201/collections?version=2017-02-14"
        );
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        assert!(matches!(
            DiscoveryClient::new(&settings("not a url")),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn listing_lookup_matches_exact_name() {
        let listing = json!({
            "environments": [
                { "environment_id": "sys", "name": "Watson System Environment" },
                { "environment_id": "e1", "name": "byod" },
            ]
        });
        assert_eq!(find_by_name(&listing, "environment", "byod"), Some("e1"));
        assert_eq!(find_by_name(&listing, "environment", "Byod"), None);
        assert_eq!(find_by_name(&json!({}), "collection", "byod"), None);
    }

    #[test]
    fn keywords_come_from_the_first_term() {
        let res = response(json!({
            "matching_results": 42,
            "aggregations": [{
                "type": "filter",
                "match": "app_name:Super Chat",
                "aggregations": [{
                    "type": "term",
                    "field": "review_enriched.keywords.text",
                    "results": [
                        { "key": "chat app", "matching_results": 12 },
                        { "key": "awesome", "matching_results": 9 }
                    ]
                }]
            }]
        }));
        assert_eq!(keywords_from(&res).unwrap(), ["chat app", "awesome"]);
    }

    #[test]
    fn average_needs_a_value() {
        let res = response(json!({
            "aggregations": [{ "aggregations": [{ "type": "average", "value": 0.37 }] }]
        }));
        assert_eq!(average_from(&res).unwrap(), 0.37);

        let empty = response(json!({
            "aggregations": [{ "aggregations": [{ "type": "average", "value": null }] }]
        }));
        assert!(matches!(average_from(&empty), Err(Error::Parse(_))));
        assert!(average_from(&QueryResponse::default()).is_err());
    }

    #[test]
    fn timeline_counts_per_day() {
        let res = response(json!({
            "aggregations": [{ "aggregations": [{
                "type": "timeslice",
                "results": [{
                    "key_as_string": "2017-03-02T00:00:00.000Z",
                    "key": 1488412800000u64,
                    "matching_results": 7,
                    "aggregations": [{ "results": [
                        { "key": "positive", "matching_results": 5 },
                        { "key": "negative", "matching_results": 2 }
                    ]}]
                }]
            }]}]
        }));
        let timeline = timeline_from(&res).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].date, "2017-03-02T00:00:00.000Z");
        assert_eq!(
            timeline[0].sentiment,
            SentimentCounts { positive: 5, neutral: 0, negative: 2 }
        );
    }

    #[test]
    fn keyword_sentiments_and_app_names() {
        let res = response(json!({
            "aggregations": [{ "aggregations": [{ "results": [{
                "key": "battery",
                "matching_results": 4,
                "aggregations": [{ "results": [
                    { "key": "negative", "matching_results": 3 },
                    { "key": "neutral", "matching_results": 1 }
                ]}]
            }]}]}]
        }));
        let keywords = keyword_sentiments_from(&res).unwrap();
        assert_eq!(keywords[0].keyword, "battery");
        assert_eq!(keywords[0].sentiment.negative, 3);
        assert_eq!(keywords[0].sentiment.neutral, 1);

        let names = response(json!({
            "aggregations": [{ "type": "term", "results": [
                { "key": "Super Chat", "matching_results": 100 },
                { "key": "Photo Box", "matching_results": 80 }
            ]}]
        }));
        assert_eq!(app_names_from(&names).unwrap(), ["Super Chat", "Photo Box"]);
    }

    #[test]
    fn turnaround_rows_become_reviews() {
        let res = response(json!({
            "matching_results": 2,
            "results": [
                { "app_name": "Super Chat", "review_id": 1001, "rating": 2, "title": "Ha",
                  "review": "Love it but crashes", "version": "2.1", "updated": "2017-03-02" },
                { "app_name": "Super Chat", "rating": "not a number" }
            ]
        }));
        let reviews = reviews_from(&res);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].review_id, "1001");
        assert_eq!(reviews[0].rating, 2);
        assert_eq!(res.matching_results, 2);
    }
}
