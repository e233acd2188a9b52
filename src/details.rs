//! Scraping of an app's store page plus the small text helpers the detail upload needs.

use scraper::{ElementRef, Html};

use crate::chart::create_selector;
use crate::{Error, Result};

const DESCRIPTION: &str = r#"[itemprop="description"]"#;
const IMAGE: &str = r#"meta[name="twitter:image"]"#;
const CATEGORY: &str = r#"span[itemprop="applicationCategory"]"#;
const RATINGS_BLOCK: &str = "div.extra-list.customer-ratings";
const RATING_LABEL: &str = "div[aria-label]";

/// Everything scraped from a single store page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDetails {
    pub description: String,
    pub image: String,
    pub category: String,
    pub rating: f64,
    pub total_reviews: u64,
}

/// Scrapes the page. A missing piece fails the whole page with a parse error.
pub fn parse_app_page(html: &str) -> Result<PageDetails> {
    let doc = Html::parse_document(html);
    let (rating, total_reviews) = find_rating_and_reviews(&doc)?;
    let total_reviews =
        total_reviews.ok_or_else(|| Error::parse("number of ratings from the ratings block"))?;

    Ok(PageDetails {
        description: find_description(&doc)?,
        image: find_image(&doc)?,
        category: find_category(&doc)?,
        rating,
        total_reviews,
    })
}

pub fn find_description(doc: &Html) -> Result<String> {
    let selector = create_selector(DESCRIPTION)?;
    let mut found = false;
    let mut description = String::new();

    for element in doc.select(&selector) {
        found = true;
        for chunk in element.text() {
            description.push_str(&clean_description(chunk));
        }
    }

    if !found {
        return Err(Error::ParseMissingSelector(DESCRIPTION.into()));
    }
    Ok(description.trim_end().to_string())
}

pub fn find_image(doc: &Html) -> Result<String> {
    let selector = create_selector(IMAGE)?;
    doc.select(&selector)
        .find_map(|meta| meta.value().attr("content"))
        .map(str::to_string)
        .ok_or_else(|| Error::ParseMissingSelector(IMAGE.into()))
}

pub fn find_category(doc: &Html) -> Result<String> {
    let selector = create_selector(CATEGORY)?;
    doc.select(&selector)
        .next()
        .map(|span| span.text().collect::<String>().trim().to_string())
        .ok_or_else(|| Error::ParseMissingSelector(CATEGORY.into()))
}

/// Finds the "All Versions" rating inside the customer ratings block.
pub fn find_rating_and_reviews(doc: &Html) -> Result<(f64, Option<u64>)> {
    let block_selector = create_selector(RATINGS_BLOCK)?;
    let label_selector = create_selector(RATING_LABEL)?;

    for block in doc.select(&block_selector) {
        let mut all_versions = false;
        for child in block.children() {
            let markup = match ElementRef::wrap(child) {
                Some(element) => element.html(),
                None => match child.value().as_text() {
                    Some(text) => String::from(&**text),
                    None => continue,
                },
            };
            if markup.contains("All Versions:") {
                all_versions = true;
            }
            if !all_versions || !markup.contains("Rating") {
                continue;
            }

            let label = ElementRef::wrap(child).and_then(|element| {
                if element.value().name() == "div" && element.value().attr("aria-label").is_some() {
                    element.value().attr("aria-label")
                } else {
                    element
                        .select(&label_selector)
                        .find_map(|div| div.value().attr("aria-label"))
                }
            });
            return match label {
                Some(label) => parse_rating_label(label),
                None => Err(Error::ParseMissingSelector(RATING_LABEL.into())),
            };
        }
    }

    Err(Error::ParseMissingSelector(RATINGS_BLOCK.into()))
}

/// Parses labels like `"4 and a half stars, 1,234 Ratings"` into `(4.5, Some(1234))`.
pub fn parse_rating_label(text: &str) -> Result<(f64, Option<u64>)> {
    let (stars, count) = split_label(text);

    let stars = stars.ok_or_else(|| Error::parse(format!("star rating from {text:?}")))?;
    let mut rating = leading_token(stars)
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| Error::parse(format!("star rating from {text:?}")))?;
    if stars.contains("and a half") {
        rating += 0.5;
    }

    let count = match count {
        Some(clause) => Some(
            leading_token(clause)
                .map(|t| t.replace(',', ""))
                .and_then(|t| t.parse::<u64>().ok())
                .ok_or_else(|| Error::parse(format!("number of ratings from {text:?}")))?,
        ),
        None => None,
    };

    Ok((rating, count))
}

/// Splits a label into its stars clause and its ratings clause. A comma between
/// two digits (`1,234`) doesn't start a new clause.
fn split_label(text: &str) -> (Option<&str>, Option<&str>) {
    let mut stars = None;
    let mut count = None;
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, b) in bytes.iter().enumerate() {
        let in_number = i > 0
            && bytes[i - 1].is_ascii_digit()
            && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        let is_separator = *b == b',' && !in_number;
        if is_separator || i + 1 == bytes.len() {
            let end = if is_separator { i } else { i + 1 };
            let clause = text[start..end].trim();
            if clause.contains("star") {
                stars.get_or_insert(clause);
            } else if clause.contains("Rating") {
                count.get_or_insert(clause);
            }
            start = i + 1;
        }
    }
    (stars, count)
}

fn leading_token(clause: &str) -> Option<&str> {
    clause.split_whitespace().next()
}

/// Keeps printable ASCII only.
pub fn to_ascii(text: &str) -> String {
    text.chars().filter(is_printable).collect()
}

fn is_printable(c: &char) -> bool {
    c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Cleans one text chunk of the description and makes sure it ends a sentence.
pub fn clean_description(text: &str) -> String {
    let ascii = to_ascii(text);
    let trimmed = ascii.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut cleaned = trimmed.to_string();
    if cleaned.ends_with(|c: char| c.is_ascii_punctuation()) {
        cleaned.push(' ');
    } else {
        cleaned.push_str(". ");
    }
    cleaned
}

/// Picks the first keyword sharing no words with the app's title or category.
/// `"app"` itself never makes a useful keyword either.
pub fn clean_keywords<S: AsRef<str>>(title: &str, category: &str, keywords: &[S]) -> Option<String> {
    let app_words: Vec<String> = title
        .split_whitespace()
        .chain(category.split_whitespace())
        .chain(std::iter::once("app"))
        .map(str::to_lowercase)
        .collect();

    keywords
        .iter()
        .map(|k| k.as_ref().to_lowercase())
        .find(|phrase| {
            !app_words
                .iter()
                .any(|word| phrase.contains(word.as_str()) || word.contains(phrase.as_str()))
        })
}
