//! Elasticsearch source: poll a `_search` endpoint for matching log lines,
//! continuing from the last seen `@timestamp` via `search_after`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::FetchError;
use crate::harness::cursor::{Cursor, Marker};
use crate::harness::dedup::Retention;
use crate::harness::{FetchBatch, Fetcher, PollConfig, RawEvent};

pub const DEFAULT_INTERVAL_SECS: u64 = 5;
const PAGE_SIZE: u64 = 1000;

/// Rulebook-style arguments for the Elasticsearch source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElasticArgs {
    #[serde(default = "default_host")]
    pub elastic_host: String,
    #[serde(default = "default_port")]
    pub elastic_port: u16,
    pub elastic_username: String,
    pub elastic_password: String,
    pub elastic_index_pattern: String,
    /// Query object forwarded verbatim as the `query` clause.
    pub query: Value,
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Maximum document ids tracked by the dedup window.
    #[serde(default)]
    pub dedup_retention: Option<u64>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    9200
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

pub struct ElasticFetcher {
    args: ElasticArgs,
    client: reqwest::Client,
}

impl ElasticFetcher {
    pub fn new(args: ElasticArgs) -> Self {
        Self {
            args,
            client: reqwest::Client::new(),
        }
    }

    fn search_url(&self) -> String {
        let host = &self.args.elastic_host;
        let base = if host.contains("://") {
            host.clone()
        } else {
            format!("https://{host}")
        };
        format!(
            "{base}:{}/{}/_search",
            self.args.elastic_port, self.args.elastic_index_pattern
        )
    }

    /// Hits in ascending `@timestamp` order become raw items; the timestamp
    /// string itself is the marker, matching the server-side sort key.
    pub(crate) fn parse_response(body: &Value) -> FetchBatch {
        let hits = body
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let items = hits
            .into_iter()
            .map(|hit| {
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                let mut raw = RawEvent::new(source.clone());
                if let Some(id) = hit.get("_id").and_then(Value::as_str) {
                    raw = raw.with_id(id);
                }
                if let Some(ts) = source.get("@timestamp").and_then(Value::as_str) {
                    raw = raw.with_marker(Marker::Text(ts.to_string()));
                }
                raw
            })
            .collect();

        FetchBatch::from_items(items)
    }
}

#[async_trait]
impl Fetcher for ElasticFetcher {
    async fn fetch(&mut self, cursor: &Cursor) -> Result<FetchBatch, FetchError> {
        let search_after = match cursor.position() {
            Some(Marker::Text(ts)) => ts.clone(),
            Some(Marker::Seq(ts)) => ts.to_string(),
            None => now_iso(),
        };
        let body = json!({
            "query": self.args.query,
            "sort": [{"@timestamp": {"order": "asc"}}],
            "search_after": [search_after],
            "size": PAGE_SIZE,
        });

        let response = self
            .client
            .post(self.search_url())
            .basic_auth(&self.args.elastic_username, Some(&self.args.elastic_password))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let body: Value = response.json().await?;
        Ok(Self::parse_response(&body))
    }

    fn name(&self) -> &str {
        &self.args.elastic_index_pattern
    }

    /// Consumption starts at "now": pre-existing documents are not replayed.
    fn initial_cursor(&self) -> Cursor {
        Cursor::at(Marker::Text(now_iso()))
    }
}

pub fn poll_config(args: &ElasticArgs) -> PollConfig {
    let mut config = PollConfig {
        interval: Duration::from_secs(args.interval),
        ..PollConfig::default()
    };
    if let Some(max) = args.dedup_retention {
        config.retention = Retention::MaxEntries(max as usize);
    }
    config
}

fn now_iso() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_extracts_hits() {
        let body = json!({
            "hits": {"hits": [
                {"_id": "h1", "_source": {"@timestamp": "2024-01-01T00:00:01", "message": "a"}},
                {"_id": "h2", "_source": {"@timestamp": "2024-01-01T00:00:02", "message": "b"}}
            ]}
        });
        let batch = ElasticFetcher::parse_response(&body);
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].id.as_deref(), Some("h1"));
        assert_eq!(
            batch.items[0].marker,
            Some(Marker::Text("2024-01-01T00:00:01".to_string()))
        );
        assert_eq!(batch.items[1].payload["message"], json!("b"));
    }

    #[test]
    fn parse_response_tolerates_empty_bodies() {
        assert!(ElasticFetcher::parse_response(&json!({})).items.is_empty());
    }

    #[test]
    fn scheme_is_preserved_when_given() {
        let fetcher = ElasticFetcher::new(ElasticArgs {
            elastic_host: "http://10.0.0.1".into(),
            elastic_port: 9200,
            elastic_username: "u".into(),
            elastic_password: "p".into(),
            elastic_index_pattern: "filebeat-*".into(),
            query: json!({"match_all": {}}),
            interval: 5,
            dedup_retention: None,
        });
        assert_eq!(fetcher.search_url(), "http://10.0.0.1:9200/filebeat-*/_search");
    }
}
