//! Cloud Pub/Sub source: pull messages over the REST API and acknowledge
//! them once retrieved.
//!
//! Takes a pre-issued OAuth bearer token; obtaining and refreshing one is the
//! caller's concern. Messages the server redelivers before an acknowledge
//! lands are suppressed by the dedup window (keyed by message id).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::FetchError;
use crate::harness::cursor::Cursor;
use crate::harness::dedup::Retention;
use crate::harness::{FetchBatch, Fetcher, PollConfig, RawEvent};

pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Rulebook-style arguments for the Pub/Sub source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PubSubArgs {
    pub project_id: String,
    pub subscription_id: String,
    /// Bearer token sent with every request.
    pub auth_token: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Maximum message ids tracked by the dedup window.
    #[serde(default)]
    pub dedup_retention: Option<u64>,
}

fn default_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_max_messages() -> u32 {
    100
}

pub struct PubSubFetcher {
    args: PubSubArgs,
    client: reqwest::Client,
}

impl PubSubFetcher {
    pub fn new(args: PubSubArgs) -> Self {
        Self {
            args,
            client: reqwest::Client::new(),
        }
    }

    fn subscription_url(&self, verb: &str) -> String {
        format!(
            "{}/v1/projects/{}/subscriptions/{}:{verb}",
            self.args.endpoint.trim_end_matches('/'),
            self.args.project_id,
            self.args.subscription_id
        )
    }

    /// Raw items plus the ack ids needed to confirm them.
    pub(crate) fn parse_pull(body: &Value) -> (Vec<RawEvent>, Vec<String>) {
        let received = body
            .get("receivedMessages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut items = Vec::with_capacity(received.len());
        let mut ack_ids = Vec::with_capacity(received.len());
        for envelope in received {
            if let Some(ack_id) = envelope.get("ackId").and_then(Value::as_str) {
                ack_ids.push(ack_id.to_string());
            }
            let message = envelope.get("message").cloned().unwrap_or(Value::Null);
            let message_id = message
                .get("messageId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let data = message
                .get("data")
                .and_then(Value::as_str)
                .and_then(|encoded| BASE64.decode(encoded).ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            let attributes = message.get("attributes").cloned().unwrap_or(json!({}));

            let payload = json!({
                "pubsub": {
                    "message_id": message_id,
                    "data": data,
                    "attributes": attributes,
                }
            });
            let mut raw = RawEvent::new(payload);
            if let Some(id) = message.get("messageId").and_then(Value::as_str) {
                raw = raw.with_id(id);
            }
            items.push(raw);
        }
        (items, ack_ids)
    }
}

#[async_trait]
impl Fetcher for PubSubFetcher {
    async fn fetch(&mut self, _cursor: &Cursor) -> Result<FetchBatch, FetchError> {
        let response = self
            .client
            .post(self.subscription_url("pull"))
            .bearer_auth(&self.args.auth_token)
            .json(&json!({"maxMessages": self.args.max_messages}))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let body: Value = response.json().await?;
        let (items, ack_ids) = Self::parse_pull(&body);

        if !ack_ids.is_empty() {
            // A failed acknowledge means the server redelivers; the dedup
            // window absorbs that, so a warning is enough.
            let ack = self
                .client
                .post(self.subscription_url("acknowledge"))
                .bearer_auth(&self.args.auth_token)
                .json(&json!({"ackIds": ack_ids}))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(error) = ack {
                tracing::warn!(
                    subscription = %self.args.subscription_id,
                    error = %error,
                    "acknowledge failed; expecting redelivery"
                );
            }
        }

        Ok(FetchBatch::from_items(items))
    }

    fn name(&self) -> &str {
        &self.args.subscription_id
    }
}

pub fn poll_config(args: &PubSubArgs) -> PollConfig {
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

    #[test]
    fn parse_pull_decodes_data_and_collects_acks() {
        let body = json!({"receivedMessages": [
            {
                "ackId": "ack-1",
                "message": {
                    "messageId": "m1",
                    "data": "aGVsbG8=",
                    "attributes": {"origin": "sensor"}
                }
            }
        ]});
        let (items, ack_ids) = PubSubFetcher::parse_pull(&body);
        assert_eq!(ack_ids, vec!["ack-1".to_string()]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_deref(), Some("m1"));
        assert_eq!(items[0].payload["pubsub"]["data"], json!("hello"));
        assert_eq!(
            items[0].payload["pubsub"]["attributes"]["origin"],
            json!("sensor")
        );
    }

    #[test]
    fn parse_pull_on_empty_response() {
        let (items, ack_ids) = PubSubFetcher::parse_pull(&json!({}));
        assert!(items.is_empty());
        assert!(ack_ids.is_empty());
    }
}
