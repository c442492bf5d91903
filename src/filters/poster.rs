//! Forward events to a webhook receiver.
//!
//! Development aid for inspecting event structure: the event always passes
//! through unchanged, whatever the receiver says.

use reqwest::Client;
use serde_json::Value;

/// POST the event as JSON to `webhook_url`, logging the outcome.
pub async fn post(client: &Client, event: Value, webhook_url: Option<&str>) -> Value {
    let url = match webhook_url.filter(|url| !url.is_empty()) {
        Some(url) => url,
        None => {
            tracing::info!("webhook url not configured; event not forwarded");
            return event;
        }
    };

    match client.post(url).json(&event).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                tracing::info!(%status, "event forwarded to webhook");
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(%status, body = %body, "webhook receiver rejected the event");
            }
        }
        Err(error) => tracing::warn!(error = %error, "webhook request failed"),
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_url_passes_the_event_through() {
        let client = Client::new();
        let event = json!({"payload": 1, "meta": {}});
        assert_eq!(post(&client, event.clone(), None).await, event);
        assert_eq!(post(&client, event.clone(), Some("")).await, event);
    }
}
