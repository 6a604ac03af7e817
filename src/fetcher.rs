//! HTTP fetch and decoding of RSS and Atom documents.

use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

/// Overall deadline for one feed request, body included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("gator/", env!("CARGO_PKG_VERSION"), " (RSS Aggregator)");

/// A decoded feed channel.
#[derive(Debug, Clone, Default)]
pub struct RssFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Default)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
        debug!("Fetching feed: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_request(url, e))?;

        let feed = parse_feed(&bytes)?;
        debug!("Parsed {} items from {}", feed.items.len(), url);
        Ok(feed)
    }
}

/// Decode an RSS (or Atom) document and unescape HTML entities in its text fields.
pub fn parse_feed(xml: &[u8]) -> Result<RssFeed, FetchError> {
    let parsed = parser::Builder::new()
        .timestamp_parser(parse_pub_date)
        .build()
        .parse(xml)?;

    let items = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();

            RssItem {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link: entry
                    .links
                    .into_iter()
                    .next()
                    .map(|l| l.href)
                    .unwrap_or_default(),
                description,
                published_at: entry.published,
            }
        })
        .collect();

    let mut feed = RssFeed {
        title: parsed.title.map(|t| t.content).unwrap_or_default(),
        link: parsed
            .links
            .into_iter()
            .next()
            .map(|l| l.href)
            .unwrap_or_default(),
        description: parsed.description.map(|d| d.content).unwrap_or_default(),
        items,
    };
    feed.unescape_html();
    Ok(feed)
}

impl RssFeed {
    /// Producers often entity-encode markup twice; the XML decoder only undoes one layer.
    pub fn unescape_html(&mut self) {
        self.title = unescape(&self.title);
        self.description = unescape(&self.description);
        for item in &mut self.items {
            item.title = unescape(&item.title);
            item.description = unescape(&item.description);
        }
    }
}

fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// RFC3339, falling back to the RFC2822 form RSS 2.0 uses. Empty or malformed dates are `None`.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
