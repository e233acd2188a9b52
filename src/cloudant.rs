//! Client for the document database (Cloudant / CouchDB REST API) holding one
//! document per app.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::model::AppDocument;
use crate::settings::CloudantSettings;
use crate::{Error, Result};

/// Where the per app documents end up.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// Creates the database unless it already exists.
    async fn ensure_database(&self) -> Result<()>;
    /// Creates the document or overwrites its fields, keeping anything else stored on it.
    async fn upsert(&self, id: &str, doc: &AppDocument) -> Result<()>;
    async fn list_documents(&self) -> Result<Vec<Value>>;
}

#[derive(Debug, Clone)]
pub struct CloudantClient {
    client: Client,
    base: Url,
    database: String,
    username: String,
    password: String,
}

impl CloudantClient {
    pub fn new(settings: &CloudantSettings) -> Result<Self> {
        let base = Url::parse(&settings.url).map_err(|e| {
            Error::Configuration(format!("CLOUDANT_URL {:?} is invalid: {e}", settings.url))
        })?;
        Ok(Self {
            client: Client::new(),
            base,
            database: settings.database.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Configuration(format!("{} can't be a base url", self.base)))?
            .pop_if_empty()
            .push(&self.database)
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Map<String, Value>>> {
        let url = self.url(&[id])?;
        let res = self.authed(self.client.get(url.clone())).send().await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(res.json().await?)),
            status => Err(Error::Fetch {
                url: url.to_string(),
                status,
            }),
        }
    }

    pub async fn delete_database(&self) -> Result<()> {
        let url = self.url(&[])?;
        let res = self.authed(self.client.delete(url.clone())).send().await?;
        match res.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => {
                info!(database = %self.database, "Deleted database");
                Ok(())
            }
            status => Err(Error::upload(url.as_str(), status)),
        }
    }
}

impl DocumentStore for CloudantClient {
    async fn ensure_database(&self) -> Result<()> {
        let url = self.url(&[])?;
        let res = self.authed(self.client.put(url.clone())).send().await?;
        match res.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                info!(database = %self.database, "Created database");
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => {
                debug!(database = %self.database, "Database already exists");
                Ok(())
            }
            status => Err(Error::upload(url.as_str(), status)),
        }
    }

    async fn upsert(&self, id: &str, doc: &AppDocument) -> Result<()> {
        let mut stored = self.fetch_document(id).await?.unwrap_or_default();
        merge_document(&mut stored, doc)?;

        let url = self.url(&[id])?;
        let res = self
            .authed(self.client.put(url.clone()))
            .json(&stored)
            .send()
            .await
            .map_err(|e| Error::upload(url.as_str(), e))?;
        let status = res.status();
        if !status.is_success() {
            let reason = res.text().await.unwrap_or_default();
            return Err(Error::upload(url.as_str(), format!("{status}: {reason}")));
        }
        debug!(id, "Saved document");
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Value>> {
        let mut url = self.url(&["_all_docs"])?;
        url.query_pairs_mut().append_pair("include_docs", "true");
        let res = self.authed(self.client.get(url.clone())).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                status,
            });
        }

        let mut listing: Value = res.json().await?;
        let rows = match listing.get_mut("rows").map(Value::take) {
            Some(Value::Array(rows)) => rows,
            _ => return Err(Error::parse("rows of the _all_docs listing")),
        };
        Ok(rows
            .into_iter()
            .map(|mut row| match row.get_mut("doc").map(Value::take) {
                Some(doc) if !doc.is_null() => doc,
                _ => row,
            })
            .collect())
    }
}

/// Writes the app fields over a stored document, leaving `_id`, `_rev` and
/// any unrelated fields in place.
pub fn merge_document(stored: &mut Map<String, Value>, doc: &AppDocument) -> Result<()> {
    match serde_json::to_value(doc)? {
        Value::Object(fields) => {
            stored.extend(fields);
            Ok(())
        }
        _ => Err(Error::parse("app document as a json object")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc() -> AppDocument {
        AppDocument {
            name: "Super Chat".into(),
            description: "Chat with friends.".into(),
            image: "https://is1.mzstatic.com/image/super-chat.png".into(),
            category: "Social Networking".into(),
            rating: 4.5,
            total_reviews: 1234,
            keyword: Some("awesome".into()),
            turnarounds: 3,
            sentiment: 0.42,
        }
    }

    #[test]
    fn merge_keeps_revision_and_extra_fields() {
        let mut stored = json!({
            "_id": "1111",
            "_rev": "3-abc",
            "name": "Old Name",
            "featured": true
        })
        .as_object()
        .cloned()
        .unwrap();

        merge_document(&mut stored, &doc()).unwrap();
        assert_eq!(stored["_rev"], "3-abc");
        assert_eq!(stored["featured"], true);
        assert_eq!(stored["name"], "Super Chat");
        assert_eq!(stored["total_reviews"], 1234);
        assert_eq!(stored["keyword"], "awesome");
    }

    #[test]
    fn merge_into_new_document() {
        let mut stored = Map::new();
        let mut no_keyword = doc();
        no_keyword.keyword = None;
        merge_document(&mut stored, &no_keyword).unwrap();
        assert_eq!(stored.len(), 9);
        assert_eq!(stored["keyword"], Value::Null);
    }

    #[test]
    fn document_urls_are_scoped_to_the_database() {
        let client = CloudantClient::new(&CloudantSettings {
            url: "https://acct.cloudant.com/".into(),
            username: "u".into(),
            password: "p".into(),
            database: "app_db".into(),
        })
        .unwrap();
        assert_eq!(
            client.url(&["1111"]).unwrap().as_str(),
            "https://acct.cloudant.com/app_db/1111"
        );
        let mut listing = client.url(&["_all_docs"]).unwrap();
        listing.query_pairs_mut().append_pair("include_docs", "true");
        assert_eq!(
            listing.as_str(),
            "https://acct.cloudant.com/app_db/_all_docs?include_docs=true"
        );
    }
}
