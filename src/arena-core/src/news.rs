//! News feed used as a source of debate topics.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::DebateError;

/// Items beyond this are ignored.
pub const MAX_NEWS_ITEMS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub description: String,
}

impl NewsItem {
    /// Debate topic synthesized from this story.
    pub fn topic(&self) -> String {
        format!(
            "The debate is about this news story: \"{}\". Here is a summary: {}",
            self.title, self.description
        )
    }
}

#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn fetch(&self, feed_url: &str) -> Result<Vec<NewsItem>, DebateError>;
}

/// RSS 2.0 feed over HTTP.
pub struct RssFeed {
    http: reqwest::Client,
}

impl RssFeed {
    pub fn new() -> Result<Self, DebateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NewsFeed for RssFeed {
    async fn fetch(&self, feed_url: &str) -> Result<Vec<NewsItem>, DebateError> {
        let response = self
            .http
            .get(feed_url)
            .send()
            .await
            .map_err(|e| DebateError::News(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DebateError::News(format!(
                "HTTP error! status: {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| DebateError::News(e.to_string()))?;

        let items = parse_rss(&body)?;
        debug!(count = items.len(), feed_url, "fetched news");
        Ok(items)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    PubDate,
    Description,
}

impl Field {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"pubDate" => Some(Field::PubDate),
            b"description" => Some(Field::Description),
            _ => None,
        }
    }
}

#[derive(Default)]
struct PartialItem {
    title: Option<String>,
    link: String,
    pub_date: String,
    description: String,
}

impl PartialItem {
    fn append(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Title => self.title.get_or_insert_with(String::new),
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
            Field::Description => &mut self.description,
        };
        target.push_str(text);
    }

    fn finish(self) -> NewsItem {
        NewsItem {
            title: self
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "No Title".to_string()),
            link: self.link.trim().to_string(),
            pub_date: self.pub_date.trim().to_string(),
            description: self.description.trim().to_string(),
        }
    }
}

/// Extract up to [`MAX_NEWS_ITEMS`] `<item>` entries from an RSS document.
///
/// Anything that is not well-formed XML with an `<rss>` or `<channel>` root
/// yields [`DebateError::FeedParse`].
pub fn parse_rss(document: &str) -> Result<Vec<NewsItem>, DebateError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<PartialItem> = None;
    let mut field: Option<Field> = None;
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DebateError::FeedParse(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = e.name();
                match name.as_ref() {
                    b"rss" | b"channel" => saw_root = true,
                    b"item" => current = Some(PartialItem::default()),
                    tag if current.is_some() => field = Field::from_tag(tag),
                    _ => {}
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"item" => {
                    if let Some(item) = current.take() {
                        items.push(item.finish());
                    }
                    field = None;
                }
                _ => field = None,
            },
            Event::Text(e) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = e
                        .unescape()
                        .map_err(|e| DebateError::FeedParse(e.to_string()))?;
                    item.append(f, &text);
                }
            }
            Event::CData(e) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    item.append(f, &String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(DebateError::FeedParse(
            "document is not an RSS feed".to_string(),
        ));
    }

    items.truncate(MAX_NEWS_ITEMS);
    Ok(items)
}
