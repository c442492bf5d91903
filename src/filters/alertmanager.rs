//! Extract alert records and alerting hosts from monitoring webhook payloads.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::path::get_path;

/// Options shared by both alert operations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertOptions {
    /// Path to the alert list. Empty treats the whole event as one alert.
    pub data_alerts_path: String,
    /// Path inside each alert to the alerting host. Empty skips host
    /// extraction.
    pub data_host_path: String,
    pub data_path_separator: String,
    /// When true, `extract_alerts` omits the original event from its output.
    pub skip_original_data: bool,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self {
            data_alerts_path: "alerts".to_string(),
            data_host_path: "labels.instance".to_string(),
            data_path_separator: ".".to_string(),
            skip_original_data: false,
        }
    }
}

/// Annotate the event with every alerting host under `meta.hosts`.
pub fn annotate_hosts(mut event: Value, options: &AlertOptions) -> Value {
    let alerts = match alerts_of(&event, options) {
        Some(alerts) => alerts,
        None => {
            tracing::warn!(
                path = %options.data_alerts_path,
                "event does not contain the alerts path"
            );
            return event;
        }
    };

    let mut all_hosts = Vec::new();
    for alert in &alerts {
        all_hosts.extend(hosts_of(alert, options));
    }

    if let Some(obj) = event.as_object_mut() {
        let meta = obj.entry("meta").or_insert_with(|| json!({}));
        if !meta.is_object() {
            *meta = json!({});
        }
        if let Some(meta) = meta.as_object_mut() {
            meta.insert("hosts".to_string(), Value::Array(all_hosts));
        }
    }
    event
}

/// Fan out one record per alert, shaped `{"alert": ..., "meta": {"hosts": [...]}}`.
///
/// The sequence is finite, one-shot and in source order. When the alerts
/// path is missing, the original event is emitted unchanged as the only
/// record.
pub fn extract_alerts(event: Value, options: &AlertOptions) -> impl Iterator<Item = Value> {
    let mut records = Vec::new();
    match alerts_of(&event, options) {
        None => {
            tracing::warn!(
                path = %options.data_alerts_path,
                "event does not contain the alerts path"
            );
            records.push(event);
        }
        Some(alerts) => {
            if !options.skip_original_data {
                records.push(event);
            }
            for alert in alerts {
                let hosts = hosts_of(&alert, options);
                records.push(json!({"alert": alert, "meta": {"hosts": hosts}}));
            }
        }
    }
    records.into_iter()
}

/// The alert list addressed by `data_alerts_path`, normalized to a vec.
fn alerts_of(event: &Value, options: &AlertOptions) -> Option<Vec<Value>> {
    if options.data_alerts_path.is_empty() {
        return Some(vec![event.clone()]);
    }
    let found = get_path(event, &options.data_alerts_path, &options.data_path_separator)?;
    Some(match found {
        Value::Array(list) => list.clone(),
        other => vec![other.clone()],
    })
}

fn hosts_of(alert: &Value, options: &AlertOptions) -> Vec<Value> {
    if options.data_host_path.is_empty() {
        return Vec::new();
    }
    let found = match get_path(alert, &options.data_host_path, &options.data_path_separator) {
        Some(found) => found,
        None => {
            tracing::warn!(
                path = %options.data_host_path,
                "alert does not contain the host path"
            );
            return Vec::new();
        }
    };
    match found {
        Value::String(host) => vec![Value::String(clean_host(host))],
        Value::Array(list) => list
            .iter()
            .filter_map(Value::as_str)
            .map(|host| Value::String(clean_host(host)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Strip the port from a `host:port` string.
fn clean_host(host: &str) -> String {
    match host.split_once(':') {
        Some((name, _port)) => name.to_string(),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_host_strips_the_port() {
        assert_eq!(clean_host("10.0.0.1:9100"), "10.0.0.1");
        assert_eq!(clean_host("bare-host"), "bare-host");
    }

    #[test]
    fn empty_alerts_path_treats_event_as_one_alert() {
        let options = AlertOptions {
            data_alerts_path: String::new(),
            ..AlertOptions::default()
        };
        let event = json!({"labels": {"instance": "web-1:80"}});
        let out = annotate_hosts(event, &options);
        assert_eq!(out["meta"]["hosts"], json!(["web-1"]));
    }
}
