//! ServiceNow source: poll a table API for records created or updated after
//! the loop started.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::FetchError;
use crate::harness::cursor::{Cursor, Marker};
use crate::harness::dedup::Retention;
use crate::harness::{FetchBatch, Fetcher, PollConfig, RawEvent};

pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Rulebook-style arguments for the ServiceNow source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnowArgs {
    /// Instance URL, e.g. `https://dev-012345.service-now.com`.
    pub instance: String,
    pub username: String,
    pub password: String,
    /// Table to watch for new records.
    pub table: String,
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Maximum record ids tracked by the dedup window.
    #[serde(default)]
    pub dedup_retention: Option<u64>,
}

fn default_query() -> String {
    "sys_created_onONToday@javascript:gs.beginningOfToday()@javascript:gs.endOfToday()".to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

pub struct SnowFetcher {
    args: SnowArgs,
    client: reqwest::Client,
    /// `sys_updated_on`-formatted start boundary, fixed at construction.
    started: String,
}

impl SnowFetcher {
    pub fn new(args: SnowArgs) -> Self {
        Self {
            args,
            client: reqwest::Client::new(),
            started: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Records become raw items keyed by `sys_id`, with the `sys_updated_on`
    /// string as marker. The API formats it fixed-width UTC, so string order
    /// is update order.
    pub(crate) fn parse_records(body: &Value) -> FetchBatch {
        let records = body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let items = records
            .into_iter()
            .map(|record| {
                let mut raw = RawEvent::new(record.clone());
                if let Some(id) = record.get("sys_id").and_then(Value::as_str) {
                    raw = raw.with_id(id);
                }
                if let Some(updated) = record.get("sys_updated_on").and_then(Value::as_str) {
                    raw = raw.with_marker(Marker::Text(updated.to_string()));
                }
                raw
            })
            .collect();

        FetchBatch::from_items(items)
    }
}

#[async_trait]
impl Fetcher for SnowFetcher {
    async fn fetch(&mut self, _cursor: &Cursor) -> Result<FetchBatch, FetchError> {
        let url = format!(
            "{}/api/now/table/{}",
            self.args.instance.trim_end_matches('/'),
            self.args.table
        );
        let response = self
            .client
            .get(url)
            .query(&[("sysparm_query", self.args.query.as_str())])
            .basic_auth(&self.args.username, Some(&self.args.password))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let body: Value = response.json().await?;
        Ok(Self::parse_records(&body))
    }

    fn name(&self) -> &str {
        &self.args.table
    }

    /// Records updated before the loop started are never delivered.
    fn initial_cursor(&self) -> Cursor {
        Cursor::at(Marker::Text(self.started.clone()))
    }
}

pub fn poll_config(args: &SnowArgs) -> PollConfig {
    let mut config = PollConfig {
        interval: Duration::from_secs(args.interval),
        ..PollConfig::default()
    };
    if let Some(max) = args.dedup_retention {
        config.retention = Retention::MaxEntries(max as usize);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_records_extracts_id_and_marker() {
        let body = json!({
            "result": [
                {"sys_id": "abc", "sys_updated_on": "2024-03-01 10:00:00", "number": "INC0001"},
                {"sys_id": "def", "sys_updated_on": "2024-03-01 10:00:05", "number": "INC0002"}
            ]
        });
        let batch = SnowFetcher::parse_records(&body);
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].id.as_deref(), Some("abc"));
        assert_eq!(
            batch.items[1].marker,
            Some(Marker::Text("2024-03-01 10:00:05".to_string()))
        );
    }

    #[test]
    fn start_boundary_excludes_older_records() {
        let cursor = Cursor::at(Marker::Text("2024-03-01 10:00:00".to_string()));
        let older = Marker::Text("2024-03-01 09:59:59".to_string());
        let newer = Marker::Text("2024-03-01 10:00:01".to_string());
        assert!(!cursor.admits(Some(&older)));
        assert!(cursor.admits(Some(&newer)));
    }
}
