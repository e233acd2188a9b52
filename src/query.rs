//! Builder for the analytics service's query language.
//!
//! Values are escaped so app names containing `:`, `,` or parentheses can't
//! change the meaning of a filter.

use std::fmt;

use crate::{Error, Result};

pub const APP_NAME: &str = "app_name";
pub const RATING: &str = "rating";
pub const UPDATED: &str = "updated";
pub const KEYWORD_TEXT: &str = "review_enriched.keywords.text";
pub const KEYWORD_SENTIMENT: &str = "review_enriched.keywords.sentiment.type";
pub const DOC_SENTIMENT_TYPE: &str = "review_enriched.docSentiment.type";
pub const DOC_SENTIMENT_SCORE: &str = "review_enriched.docSentiment.score";

const SPECIAL: &[char] = &['\\', ':', ',', '!', '"', '(', ')', '[', ']', '|', '<', '>', '~', '*', '^'];

/// Escapes query language metacharacters with a backslash.
pub fn escape_value(value: &str) -> Result<String> {
    if value.chars().any(char::is_control) {
        return Err(Error::InvalidQueryValue(value.to_string()));
    }
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Ok(escaped)
}

/// Comma joined (AND) filter clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: &str, value: &str) -> Result<Self> {
        self.clauses.push(format!("{field}:{}", escape_value(value)?));
        Ok(self)
    }

    pub fn lt(mut self, field: &str, value: i64) -> Self {
        self.clauses.push(format!("{field}<{value}"));
        self
    }

    /// Reviews of exactly this app.
    pub fn app(app_name: &str) -> Result<Self> {
        Self::new().equals(APP_NAME, app_name)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clauses.join(","))
    }
}

/// Dot chained aggregation expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    steps: Vec<String>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: &Filter) -> Self {
        self.steps.push(format!("filter({filter})"));
        self
    }

    pub fn term(mut self, field: &str) -> Self {
        self.steps.push(format!("term({field})"));
        self
    }

    pub fn average(mut self, field: &str) -> Self {
        self.steps.push(format!("average({field})"));
        self
    }

    pub fn timeslice(mut self, field: &str, interval: &str) -> Self {
        self.steps.push(format!("timeslice({field},{interval})"));
        self
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.steps.join("."))
    }
}

/// Parameters of a single query request.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub filter: Option<Filter>,
    pub aggregation: Option<Aggregation>,
    pub return_fields: Option<&'static str>,
    pub count: Option<usize>,
}

impl QueryParams {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(filter) = &self.filter {
            pairs.push(("filter", filter.to_string()));
        }
        if let Some(aggregation) = &self.aggregation {
            pairs.push(("aggregation", aggregation.to_string()));
        }
        if let Some(fields) = self.return_fields {
            pairs.push(("return", fields.to_string()));
        }
        if let Some(count) = self.count {
            pairs.push(("count", count.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_metacharacters() {
        assert_eq!(escape_value("Super Chat").unwrap(), "Super Chat");
        assert_eq!(
            escape_value("Chat: Fast, (Free)").unwrap(),
            r"Chat\: Fast\, \(Free\)"
        );
        assert_eq!(escape_value(r#"a\b"c"#).unwrap(), r#"a\\b\"c"#);
    }

    #[test]
    fn rejects_control_characters() {
        assert!(matches!(
            escape_value("Chat\napp_name:x"),
            Err(Error::InvalidQueryValue(_))
        ));
    }

    #[test]
    fn turnaround_filter() {
        let filter = Filter::app("Super Chat")
            .unwrap()
            .equals(DOC_SENTIMENT_TYPE, "positive")
            .unwrap()
            .lt(RATING, 3);
        assert_eq!(
            filter.to_string(),
            "app_name:Super Chat,review_enriched.docSentiment.type:positive,rating<3"
        );
    }

    #[test]
    fn keyword_aggregation() {
        let agg = Aggregation::new()
            .filter(&Filter::app("Photo (Pro)").unwrap())
            .term(KEYWORD_TEXT)
            .term(KEYWORD_SENTIMENT);
        assert_eq!(
            agg.to_string(),
            r"filter(app_name:Photo \(Pro\)).term(review_enriched.keywords.text).term(review_enriched.keywords.sentiment.type)"
        );
    }

    #[test]
    fn params_only_include_what_is_set() {
        let params = QueryParams {
            aggregation: Some(Aggregation::new().term(APP_NAME)),
            count: Some(0),
            ..Default::default()
        };
        assert_eq!(
            params.pairs(),
            vec![
                ("aggregation", "term(app_name)".to_string()),
                ("count", "0".to_string())
            ]
        );
    }
}
