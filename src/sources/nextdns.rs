//! NextDNS source: subscribe to a profile's log stream over SSE.

use anyhow::{bail, Context};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::event::{Event, EventSink};

/// Rulebook-style arguments for the NextDNS source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NextDnsArgs {
    pub api_key: String,
    pub profile_id: String,
}

/// Validate credentials against the analytics endpoint, then stream log
/// entries into the sink until the connection or the sink drops.
pub async fn run<S: EventSink>(args: &NextDnsArgs, sink: &S) -> anyhow::Result<()> {
    if args.api_key.is_empty() || args.profile_id.is_empty() {
        bail!("both api_key and profile_id are required");
    }
    let client = reqwest::Client::new();

    // Probe first so auth problems surface before the stream opens.
    let status_url = format!(
        "https://api.nextdns.io/profiles/{}/analytics/status",
        args.profile_id
    );
    let response = client
        .get(&status_url)
        .header("X-Api-Key", &args.api_key)
        .send()
        .await
        .context("nextdns status probe")?;
    match response.status() {
        reqwest::StatusCode::FORBIDDEN => {
            bail!("access forbidden: invalid api key or profile id")
        }
        status if !status.is_success() => bail!("unexpected status {status}"),
        _ => {}
    }

    let stream_url = format!(
        "https://api.nextdns.io/profiles/{}/logs/stream",
        args.profile_id
    );
    let response = client
        .get(&stream_url)
        .header("X-Api-Key", &args.api_key)
        .send()
        .await
        .context("nextdns log stream")?
        .error_for_status()?;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("nextdns stream read")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk).replace('\r', ""));
        while let Some(data) = next_sse_data(&mut buffer) {
            let log: Value = match serde_json::from_str(&data) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(error = %error, "skipping undecodable log frame");
                    continue;
                }
            };
            let event = Event::from_value(json!({"nextdns": {"log": log}}));
            sink.put(event).await?;
        }
    }
    Ok(())
}

/// Pop the next complete SSE frame's data payload off the buffer. Frames
/// without a `data:` line (keep-alives, comments) are consumed and skipped.
fn next_sse_data(buffer: &mut String) -> Option<String> {
    loop {
        let end = buffer.find("\n\n")?;
        let frame: String = buffer.drain(..end + 2).collect();
        let mut data = String::new();
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            }
        }
        if !data.is_empty() {
            return Some(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frames_are_popped_in_order() {
        let mut buffer = String::from("data: {\"a\":1}\n\ndata: {\"b\":2}\n\npartial");
        assert_eq!(next_sse_data(&mut buffer).as_deref(), Some("{\"a\":1}"));
        assert_eq!(next_sse_data(&mut buffer).as_deref(), Some("{\"b\":2}"));
        assert_eq!(next_sse_data(&mut buffer), None);
        assert_eq!(buffer, "partial");
    }

    #[test]
    fn keepalive_frames_are_skipped() {
        let mut buffer = String::from(": ping\n\ndata: {\"a\":1}\n\n");
        assert_eq!(next_sse_data(&mut buffer).as_deref(), Some("{\"a\":1}"));
        assert_eq!(next_sse_data(&mut buffer), None);
    }

    #[test]
    fn multiline_data_is_joined() {
        let mut buffer = String::from("data: {\"a\":\ndata: 1}\n\n");
        assert_eq!(next_sse_data(&mut buffer).as_deref(), Some("{\"a\":\n1}"));
    }
}
