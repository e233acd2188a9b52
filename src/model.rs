use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Id given to a chart entry whose link carries no `/id<digits>` segment.
pub const NOT_FOUND_ID: &str = "not found";

/// One entry of the top free apps chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSummary {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl AppSummary {
    pub fn has_id(&self) -> bool {
        self.id != NOT_FOUND_ID
    }
}

/// A single customer review as read from the reviews feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub app_name: String,
    pub review_id: String,
    pub updated: String,
    pub rating: u8,
    pub version: String,
    pub title: String,
    pub review: String,
}

/// The JSON document uploaded to the analytics collection for every review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDocument {
    pub review_id: i64,
    pub app_name: String,
    pub version: String,
    pub updated: String,
    pub title: String,
    pub rating: i64,
    pub review: String,
}

impl TryFrom<&Review> for ReviewDocument {
    type Error = Error;

    fn try_from(review: &Review) -> Result<Self> {
        Ok(Self {
            review_id: coerce_int(&review.review_id)?,
            app_name: review.app_name.clone(),
            version: review.version.clone(),
            updated: review.updated.clone(),
            title: review.title.clone(),
            rating: i64::from(review.rating),
            review: review.review.clone(),
        })
    }
}

/// Per app document stored in the document database, keyed by the app id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDocument {
    pub name: String,
    pub description: String,
    pub image: String,
    pub category: String,
    pub rating: f64,
    pub total_reviews: u64,
    pub keyword: Option<String>,
    pub turnarounds: u64,
    pub sentiment: f64,
}

/// Parses an integer that may have come through the feed as a float (`"5.0"`),
/// truncating any fractional part.
pub fn coerce_int(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(f.trunc() as i64),
        _ => Err(Error::parse(format!("integer from {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review() -> Review {
        Review {
            app_name: "Super Chat".into(),
            review_id: "1520001234".into(),
            updated: "2017-03-02T10:11:12-07:00".into(),
            rating: 4,
            version: "2.1".into(),
            title: "Nice".into(),
            review: "Works well.".into(),
        }
    }

    #[test]
    fn coerce_int_drops_fractional_noise() {
        assert_eq!(coerce_int("5").unwrap(), 5);
        assert_eq!(coerce_int(" 3.0 ").unwrap(), 3);
        assert_eq!(coerce_int("1520001234.7").unwrap(), 1520001234);
        assert!(matches!(coerce_int("abc"), Err(Error::Parse(_))));
        assert!(coerce_int("NaN").is_err());
    }

    #[test]
    fn review_document_serializes_integers() {
        let doc = ReviewDocument::try_from(&review()).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["review_id"], 1520001234);
        assert_eq!(json["rating"], 4);
        assert_eq!(json["app_name"], "Super Chat");
    }

    #[test]
    fn review_document_rejects_non_numeric_id() {
        let mut bad = review();
        bad.review_id = "tag:itunes.apple.com".into();
        assert!(ReviewDocument::try_from(&bad).is_err());
    }

    #[test]
    fn app_summary_sentinel_id() {
        let app = AppSummary {
            id: NOT_FOUND_ID.into(),
            title: "Mystery".into(),
            url: String::new(),
        };
        assert!(!app.has_id());
    }
}
