//! Webhook.site source: poll the requests API for captured webhook calls.
//!
//! Requests carry no usable recency marker for cursor comparison, so the
//! dedup window (keyed by the request uuid) is the only redelivery
//! suppressor; the API-side `created_at` range keeps each response small.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{FetchError, NormalizeError};
use crate::event::Event;
use crate::harness::cursor::Cursor;
use crate::harness::dedup::Retention;
use crate::harness::{FetchBatch, Fetcher, Normalizer, PollConfig, RawEvent};

pub const DEFAULT_INTERVAL_SECS: u64 = 15;

/// Look-back applied to the `created_at` range on every poll.
const LOOKBACK_MINUTES: i64 = 5;

/// Rulebook-style arguments for the Webhook.site source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookSiteArgs {
    /// The token identifying your request bin.
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Suppress delivery of requests discovered on the first poll.
    #[serde(default = "default_true")]
    pub skip_first_poll: bool,
    /// Maximum request uuids tracked by the dedup window.
    #[serde(default)]
    pub dedup_retention: Option<u64>,
}

fn default_api_url() -> String {
    "https://webhook.site/token/{token}/requests".to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

pub struct WebhookSiteFetcher {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl WebhookSiteFetcher {
    pub fn new(args: &WebhookSiteArgs) -> Self {
        Self {
            url: args.api_url.replace("{token}", &args.token),
            token: args.token.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub(crate) fn parse_requests(body: &Value) -> FetchBatch {
        let requests = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let items = requests
            .into_iter()
            .map(|request| {
                let mut raw = RawEvent::new(request.clone());
                if let Some(uuid) = request.get("uuid").and_then(Value::as_str) {
                    raw = raw.with_id(uuid);
                }
                raw
            })
            .collect();

        FetchBatch::from_items(items)
    }
}

#[async_trait]
impl Fetcher for WebhookSiteFetcher {
    async fn fetch(&mut self, _cursor: &Cursor) -> Result<FetchBatch, FetchError> {
        let window_start = (chrono::Utc::now() - chrono::Duration::minutes(LOOKBACK_MINUTES))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[("created_at", format!("\"{window_start}\" TO *"))])
            .header("Token", &self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let body: Value = response.json().await?;
        Ok(Self::parse_requests(&body))
    }

    fn name(&self) -> &str {
        "webhook.site"
    }
}

/// Parses the captured request `content` string as JSON before delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebhookSiteNormalizer;

impl Normalizer for WebhookSiteNormalizer {
    fn normalize(&self, raw: &RawEvent) -> Result<Event, NormalizeError> {
        let mut payload = raw.payload.clone();
        let content = match payload.get("content") {
            Some(Value::String(text)) => serde_json::from_str::<Value>(text)
                .map_err(|e| NormalizeError::Malformed(format!("request content: {e}")))?,
            Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
            Some(other) => other.clone(),
        };
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("content".to_string(), content);
        }
        Ok(Event::from_value(payload))
    }
}

pub fn poll_config(args: &WebhookSiteArgs) -> PollConfig {
    let mut config = PollConfig {
        interval: Duration::from_secs(args.interval),
        skip_first_poll: args.skip_first_poll,
        ..PollConfig::default()
    };
    if let Some(max) = args.dedup_retention {
        config.retention = Retention::MaxEntries(max as usize);
    }
    config
}
