//! Re-key an event under the endpoint that received it.

use serde_json::{Map, Value};

/// Move the whole event under the key named by `meta.endpoint`, so that an
/// event received on the `testing` endpoint becomes addressable as
/// `event.testing.payload` / `event.testing.meta`.
///
/// Events without a usable endpoint pass through unchanged.
pub fn apply(event: Value) -> Value {
    let endpoint = event
        .get("meta")
        .and_then(|meta| meta.get("endpoint"))
        .and_then(Value::as_str)
        .filter(|endpoint| !endpoint.is_empty())
        .map(str::to_string);

    match endpoint {
        Some(endpoint) => {
            let mut wrapped = Map::new();
            wrapped.insert(endpoint, event);
            Value::Object(wrapped)
        }
        None => {
            tracing::warn!("event has no meta.endpoint; leaving it unchanged");
            event
        }
    }
}
