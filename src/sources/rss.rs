//! RSS feed source: poll one or more feeds and emit new items as events.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::FetchError;
use crate::event::EventSink;
use crate::harness::cursor::{Cursor, Marker};
use crate::harness::dedup::Retention;
use crate::harness::{
    FetchBatch, Fetcher, PassthroughNormalizer, PollConfig, PollHandle, PollSource, RawEvent,
};
use crate::path::get_dot_path;

pub const DEFAULT_INTERVAL_SECS: u64 = 7200;

/// Configuration for one feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Substring filter applied to the item description.
    #[serde(default)]
    pub search: Option<String>,
    /// Dot-path inside the item whose value is lifted into a `content_tags`
    /// key on the event.
    #[serde(default)]
    pub content_tags: Option<String>,
    /// Per-feed poll interval in seconds, falling back to the global default.
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Rulebook-style arguments: a list of feeds plus global defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RssArgs {
    pub feed_configs: Vec<FeedConfig>,
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Deliver the newest item already on the feed as the first event.
    #[serde(default)]
    pub most_recent_item: bool,
    /// Maximum item ids tracked by the dedup window.
    #[serde(default)]
    pub dedup_retention: Option<u64>,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "lastBuildDate")]
    last_build_date: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "$text")]
    value: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> u64 {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .unwrap_or(0)
}

/// Fetcher for a single feed.
pub struct RssFetcher {
    name: String,
    mode: Mode,
    search: Option<String>,
    content_tags: Option<String>,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFetcher {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            name: config.url.clone(),
            mode: Mode::Http {
                url: config.url.clone(),
                client: reqwest::Client::new(),
            },
            search: config.search.clone(),
            content_tags: config.content_tags.clone(),
        }
    }

    /// Parse a canned feed body instead of fetching; used by tests.
    pub fn from_fixture(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(xml.to_string()),
            search: None,
            content_tags: None,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_content_tags(mut self, path: impl Into<String>) -> Self {
        self.content_tags = Some(path.into());
        self
    }

    fn parse_feed(&self, xml: &str) -> Result<FetchBatch, FetchError> {
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss =
            from_str(&xml_clean).map_err(|e| FetchError::Decode(format!("rss xml: {e}")))?;

        let mut items = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let description = it
                .description
                .as_deref()
                .map(|d| html_escape::decode_html_entities(d).to_string())
                .unwrap_or_default();
            if let Some(search) = &self.search {
                if !description.contains(search.as_str()) {
                    continue;
                }
            }

            let marker = it
                .pub_date
                .as_deref()
                .map(parse_rfc2822_to_unix)
                .filter(|ts| *ts > 0)
                .map(Marker::Seq);

            let mut payload = Map::new();
            payload.insert(
                "title".to_string(),
                Value::String(
                    it.title
                        .as_deref()
                        .map(|t| html_escape::decode_html_entities(t).to_string())
                        .unwrap_or_default(),
                ),
            );
            if let Some(link) = &it.link {
                payload.insert("link".to_string(), Value::String(link.clone()));
            }
            payload.insert("description".to_string(), Value::String(description));
            if let Some(published) = &it.pub_date {
                payload.insert("published".to_string(), Value::String(published.clone()));
            }
            let tags: Vec<Value> = it
                .categories
                .iter()
                .filter_map(|c| c.value.clone())
                .map(Value::String)
                .collect();
            if !tags.is_empty() {
                payload.insert("tags".to_string(), Value::Array(tags));
            }

            let payload = Value::Object(payload);
            let payload = match &self.content_tags {
                Some(path) => {
                    let lifted = get_dot_path(&payload, path).cloned();
                    let mut obj = match payload {
                        Value::Object(obj) => obj,
                        _ => Map::new(),
                    };
                    if let Some(tags) = lifted {
                        obj.insert("content_tags".to_string(), tags);
                    }
                    Value::Object(obj)
                }
                None => payload,
            };

            let mut raw = RawEvent::new(payload);
            if let Some(link) = it.link {
                raw = raw.with_id(link);
            }
            if let Some(marker) = marker {
                raw = raw.with_marker(marker);
            }
            items.push(raw);
        }

        let cursor_candidate = rss
            .channel
            .last_build_date
            .as_deref()
            .map(parse_rfc2822_to_unix)
            .filter(|ts| *ts > 0)
            .map(Marker::Seq);

        Ok(FetchBatch {
            items,
            cursor_candidate,
        })
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch(&mut self, _cursor: &Cursor) -> Result<FetchBatch, FetchError> {
        match &self.mode {
            Mode::Fixture(xml) => self.parse_feed(xml),
            Mode::Http { url, client } => {
                let response = client.get(url).send().await?.error_for_status()?;
                let body = response.text().await?;
                self.parse_feed(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn initial_cursor(&self) -> Cursor {
        Cursor::start()
    }
}

/// Loop configuration for one feed.
///
/// Without `most_recent_item` the first pass only records what is already on
/// the feed, so only items published after startup are delivered.
pub fn poll_config(args: &RssArgs, feed: &FeedConfig) -> PollConfig {
    let mut config = PollConfig {
        interval: Duration::from_secs(feed.interval.unwrap_or(args.interval)),
        most_recent_item: args.most_recent_item,
        skip_first_poll: !args.most_recent_item,
        ..PollConfig::default()
    };
    if let Some(max) = args.dedup_retention {
        config.retention = Retention::MaxEntries(max as usize);
    }
    config
}

/// Spawn one poll loop per configured feed, all sharing the sink.
pub fn spawn_feeds<S>(args: &RssArgs, sink: S) -> Vec<PollHandle>
where
    S: EventSink + Clone + 'static,
{
    args.feed_configs
        .iter()
        .map(|feed| {
            PollSource::new(
                RssFetcher::from_config(feed),
                PassthroughNormalizer,
                sink.clone(),
                poll_config(args, feed),
            )
            .spawn()
        })
        .collect()
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
