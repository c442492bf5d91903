//! Canonical event shape and the sink it is delivered into.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::SinkError;

/// Ordered JSON object backing an [`Event`].
pub type EventObject = Map<String, Value>;

/// A normalized event: an ordered mapping guaranteed to carry a `meta` object.
///
/// Immutable by convention once handed to the sink; filters downstream operate
/// on plain [`Value`]s and re-wrap as needed.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Event(EventObject);

impl Event {
    /// Build an event from an object, inserting an empty `meta` if absent.
    pub fn from_object(mut obj: EventObject) -> Self {
        if !obj.get("meta").is_some_and(Value::is_object) {
            obj.insert("meta".to_string(), Value::Object(Map::new()));
        }
        Self(obj)
    }

    /// Wrap an arbitrary JSON value. Objects become the event body; anything
    /// else lands under a `payload` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(obj) => Self::from_object(obj),
            other => {
                let mut obj = Map::new();
                obj.insert("payload".to_string(), other);
                Self::from_object(obj)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `meta` object. Present by construction.
    pub fn meta(&self) -> &EventObject {
        self.0
            .get("meta")
            .and_then(Value::as_object)
            .expect("event meta is an object")
    }

    pub fn meta_mut(&mut self) -> &mut EventObject {
        let meta = self
            .0
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        meta.as_object_mut().expect("event meta is an object")
    }

    pub fn as_object(&self) -> &EventObject {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Destination queue owned by the host scheduler.
///
/// `put` suspends while the sink exerts backpressure; a stalled consumer
/// stalls the poll loop in its delivery phase, which is flow control, not
/// failure.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn put(&self, event: Event) -> Result<(), SinkError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<Event> {
    async fn put(&self, event: Event) -> Result<(), SinkError> {
        self.send(event).await.map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_is_inserted_when_absent() {
        let ev = Event::from_value(json!({"a": 1}));
        assert_eq!(ev.get("a"), Some(&json!(1)));
        assert!(ev.meta().is_empty());
    }

    #[test]
    fn existing_meta_is_preserved() {
        let ev = Event::from_value(json!({"meta": {"endpoint": "testing"}}));
        assert_eq!(ev.meta().get("endpoint"), Some(&json!("testing")));
    }

    #[test]
    fn non_object_values_are_wrapped() {
        let ev = Event::from_value(json!("hello"));
        assert_eq!(ev.get("payload"), Some(&json!("hello")));
        assert!(ev.meta().is_empty());
    }
}
