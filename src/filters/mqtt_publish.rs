//! Publish events to an MQTT topic, recording the outcome under `meta`.

use anyhow::anyhow;
use rumqttc::{AsyncClient, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Topic used when neither an explicit topic nor `meta.endpoint` is set.
pub const DEFAULT_TOPIC: &str = "events";

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttPublishOptions {
    pub mqtt_broker: String,
    #[serde(default = "default_port")]
    pub mqtt_port: u16,
    /// Explicit topic. Falls back to `meta.endpoint`, then [`DEFAULT_TOPIC`].
    #[serde(default)]
    pub mqtt_topic: Option<String>,
}

fn default_port() -> u16 {
    1883
}

/// Publish the event and annotate `meta.mqtt_status` with the outcome
/// (`failure` also records `meta.error_message`). Without a broker the event
/// passes through untouched.
pub async fn publish(mut event: Value, options: &MqttPublishOptions) -> Value {
    if options.mqtt_broker.is_empty() {
        tracing::warn!("mqtt broker is not configured");
        return event;
    }
    let topic = select_topic(&event, options);

    let outcome = match tokio::time::timeout(
        PUBLISH_TIMEOUT,
        publish_once(&options.mqtt_broker, options.mqtt_port, &topic, &event),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(anyhow!("publish timed out after {PUBLISH_TIMEOUT:?}")),
    };

    if let Some(obj) = event.as_object_mut() {
        let meta = obj.entry("meta").or_insert_with(|| json!({}));
        if !meta.is_object() {
            *meta = json!({});
        }
        if let Some(meta) = meta.as_object_mut() {
            match &outcome {
                Ok(()) => {
                    meta.insert("mqtt_status".to_string(), json!("success"));
                }
                Err(error) => {
                    tracing::warn!(topic = %topic, error = %error, "mqtt publish failed");
                    meta.insert("mqtt_status".to_string(), json!("failure"));
                    meta.insert("error_message".to_string(), json!(error.to_string()));
                }
            }
        }
    }
    event
}

fn select_topic(event: &Value, options: &MqttPublishOptions) -> String {
    options
        .mqtt_topic
        .clone()
        .filter(|topic| !topic.is_empty())
        .or_else(|| {
            event
                .get("meta")
                .and_then(|meta| meta.get("endpoint"))
                .and_then(Value::as_str)
                .filter(|endpoint| !endpoint.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
}

/// Connect, publish once at-least-once, wait for the ack, disconnect.
async fn publish_once(broker: &str, port: u16, topic: &str, event: &Value) -> anyhow::Result<()> {
    let mut mqtt_options = MqttOptions::new("rulebook-events-filter", broker, port);
    mqtt_options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 8);

    let payload = serde_json::to_vec(event)?;
    client
        .publish(topic, QoS::AtLeastOnce, false, payload)
        .await?;
    loop {
        match eventloop.poll().await {
            Ok(rumqttc::Event::Incoming(Packet::PubAck(_))) => break,
            Ok(_) => {}
            Err(error) => return Err(error.into()),
        }
    }
    client.disconnect().await?;
    Ok(())
}
