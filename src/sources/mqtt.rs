//! MQTT subscription source. Push-based: bypasses the polling harness and
//! forwards broker messages straight to the sink.

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::event::{Event, EventSink};

/// Rulebook-style arguments for the MQTT source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttArgs {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base topic; the subscription covers `<topic>/#`.
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "rulebook-events-source".to_string()
}

/// Subscribe and forward messages until the connection or the sink drops.
pub async fn run<S: EventSink>(args: &MqttArgs, sink: &S) -> anyhow::Result<()> {
    let mut options = MqttOptions::new(&args.client_id, &args.host, args.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 64);
    client
        .subscribe(format!("{}/#", args.topic), QoS::AtMostOnce)
        .await
        .context("mqtt subscribe")?;
    tracing::info!(host = %args.host, topic = %args.topic, "subscribed");

    loop {
        match eventloop.poll().await {
            Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                let event = decode_payload(&publish.topic, &publish.payload);
                sink.put(event).await?;
            }
            Ok(_) => {}
            Err(error) => return Err(error).context("mqtt connection lost"),
        }
    }
}

/// JSON object payloads become the event body; anything else is wrapped as a
/// string payload. The topic lands under `meta`.
fn decode_payload(topic: &str, bytes: &[u8]) -> Event {
    let text = String::from_utf8_lossy(bytes);
    let mut event = match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => Event::from_value(value),
        _ => Event::from_value(Value::String(text.into_owned())),
    };
    event
        .meta_mut()
        .insert("topic".to_string(), Value::String(topic.to_string()));
    event
}
