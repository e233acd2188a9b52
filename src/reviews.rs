//! Customer reviews read from the paginated App Store reviews feed.

use chrono::Local;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use tracing::{debug, warn};

use crate::model::{coerce_int, Review};
use crate::request::Fetch;
use crate::{info_time, Error, Result};

pub const DEFAULT_FEED_URL: &str = "https://itunes.apple.com/us/rss/customerreviews";
/// The feed never serves more than ten pages per app.
pub const MAX_PAGES: usize = 10;

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const ITUNES_NS: &[u8] = b"http://itunes.apple.com/rss";

pub fn feed_url(feed_base: &str, page: usize, app_id: &str) -> String {
    format!(
        "{}/page={page}/id={app_id}/sortby=mostrecent/xml",
        feed_base.trim_end_matches('/')
    )
}

/// Walks pages `1..=MAX_PAGES` of the feed and collects every review.
/// The first page answered with a non-success status ends the walk.
pub async fn extract_reviews<F: Fetch>(
    fetcher: &F,
    feed_base: &str,
    app_name: &str,
    app_id: &str,
) -> Result<Vec<Review>> {
    let start_time = Local::now();
    let mut reviews = Vec::new();

    for page in 1..=MAX_PAGES {
        let url = feed_url(feed_base, page, app_id);
        let xml = match fetcher.fetch(&url).await {
            Ok(xml) => xml,
            Err(Error::Fetch { status, .. }) => {
                debug!(%status, page, app_name, "Feed ended");
                break;
            }
            Err(e) => return Err(e),
        };
        reviews.extend(parse_feed(app_name, &xml)?);
    }

    info_time!(start_time, "Extracted {} reviews for {}", reviews.len(), app_name);
    Ok(reviews)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Updated,
    Title,
    Content,
    Rating,
    Version,
}

#[derive(Debug, Default)]
struct EntryFields {
    id: Option<String>,
    updated: Option<String>,
    title: Option<String>,
    content: Option<String>,
    rating: Option<String>,
    version: Option<String>,
}

impl EntryFields {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Id => &mut self.id,
            Field::Updated => &mut self.updated,
            Field::Title => &mut self.title,
            Field::Content => &mut self.content,
            Field::Rating => &mut self.rating,
            Field::Version => &mut self.version,
        }
    }

    /// `None` for entries that aren't reviews (the feed's own header entry has no rating).
    fn into_review(self, app_name: &str) -> Option<Review> {
        let raw_rating = self.rating?;
        let rating = match coerce_int(&raw_rating) {
            Ok(n @ 1..=5) => n as u8,
            _ => {
                warn!(app_name, rating = %raw_rating, "Skipping review with invalid rating");
                return None;
            }
        };
        let Some(review_id) = self.id.map(|id| id.trim().to_string()) else {
            warn!(app_name, "Skipping review without an id");
            return None;
        };

        Some(Review {
            app_name: app_name.to_string(),
            review_id,
            updated: self.updated.unwrap_or_default().trim().to_string(),
            rating,
            version: self.version.unwrap_or_default().trim().to_string(),
            title: self.title.unwrap_or_default().trim().to_string(),
            review: self.content.unwrap_or_default().trim().to_string(),
        })
    }
}

fn field_for(ns: &ResolveResult, local_name: &[u8], direct_child: bool) -> Option<Field> {
    match ns {
        ResolveResult::Bound(Namespace(ns)) if *ns == ATOM_NS && direct_child => match local_name {
            b"id" => Some(Field::Id),
            b"updated" => Some(Field::Updated),
            b"title" => Some(Field::Title),
            b"content" => Some(Field::Content),
            _ => None,
        },
        ResolveResult::Bound(Namespace(ns)) if *ns == ITUNES_NS => match local_name {
            b"rating" => Some(Field::Rating),
            b"version" => Some(Field::Version),
            _ => None,
        },
        _ => None,
    }
}

fn is_atom_entry(ns: &ResolveResult, local_name: &[u8]) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(ns)) if *ns == ATOM_NS) && local_name == b"entry"
}

/// Parses one page of the feed. Only the first occurrence of every field counts,
/// so of the feed's two `content` elements the plain text one is kept.
pub fn parse_feed(app_name: &str, xml: &str) -> Result<Vec<Review>> {
    let mut reader = NsReader::from_str(xml);
    let mut reviews = Vec::new();

    let mut depth = 0usize;
    // (depth of the <entry>, fields seen so far)
    let mut entry: Option<(usize, EntryFields)> = None;
    // (field, depth of its element, text so far)
    let mut capture: Option<(Field, usize, String)> = None;

    loop {
        let (ns, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(e) => {
                depth += 1;
                let local_name = e.local_name();
                match entry.as_mut() {
                    None if is_atom_entry(&ns, local_name.as_ref()) => {
                        entry = Some((depth, EntryFields::default()));
                    }
                    Some((entry_depth, fields)) if capture.is_none() => {
                        let direct_child = depth == *entry_depth + 1;
                        if let Some(field) = field_for(&ns, local_name.as_ref(), direct_child) {
                            if fields.slot(field).is_none() {
                                capture = Some((field, depth, String::new()));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if let Some((entry_depth, fields)) = entry.as_mut() {
                    let direct_child = depth == *entry_depth;
                    if let Some(field) = field_for(&ns, e.local_name().as_ref(), direct_child) {
                        if capture.is_none() {
                            fields.slot(field).get_or_insert_with(String::new);
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| Error::parse(format!("feed text: {e}")))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                if capture.as_ref().is_some_and(|(_, d, _)| *d == depth) {
                    if let (Some((field, _, text)), Some((_, fields))) = (capture.take(), entry.as_mut()) {
                        *fields.slot(field) = Some(text);
                    }
                }
                if entry.as_ref().is_some_and(|(d, _)| *d == depth) {
                    if let Some(review) = entry.take().and_then(|(_, f)| f.into_review(app_name)) {
                        reviews.push(review);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof if depth != 0 || entry.is_some() => {
                return Err(Error::parse(format!("truncated feed, {depth} elements left open")));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(reviews)
}
