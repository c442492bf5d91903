// tests/harness_poll.rs
// Drives the poll loop with a scripted fetcher and an mpsc sink.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use rulebook_events::harness::{
    FetchBatch, Fetcher, Normalizer, PassthroughNormalizer, PollConfig, PollSource, RawEvent,
};
use rulebook_events::{Cursor, Event, FetchError, Marker, NormalizeError};

struct ScriptedFetcher {
    batches: VecDeque<Result<FetchBatch, FetchError>>,
}

impl ScriptedFetcher {
    fn new(batches: Vec<Result<FetchBatch, FetchError>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&mut self, _cursor: &Cursor) -> Result<FetchBatch, FetchError> {
        self.batches
            .pop_front()
            .unwrap_or_else(|| Ok(FetchBatch::default()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Item with both an id and a recency marker.
fn marked(id: &str, marker: u64) -> RawEvent {
    RawEvent::new(json!({"id": id, "marker": marker}))
        .with_id(id)
        .with_marker(Marker::Seq(marker))
}

/// Item with an id only; the dedup window is its sole suppressor.
fn unmarked(id: &str) -> RawEvent {
    RawEvent::new(json!({"id": id})).with_id(id)
}

fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.get("id").and_then(|v| v.as_str()).unwrap_or("-").to_string())
        .collect()
}

#[tokio::test]
async fn delivery_is_oldest_first() {
    let batch = FetchBatch::from_items(vec![marked("c", 3), marked("a", 1), marked("b", 2)]);
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(vec![Ok(batch)]),
        PassthroughNormalizer,
        tx,
        PollConfig::default(),
    );

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.delivered, 3);
    assert_eq!(ids(&drain(&mut rx)), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn duplicate_ids_deliver_exactly_once() {
    let batches = vec![
        Ok(FetchBatch::from_items(vec![unmarked("a")])),
        Ok(FetchBatch::from_items(vec![unmarked("a"), unmarked("b")])),
    ];
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(batches),
        PassthroughNormalizer,
        tx,
        PollConfig::default(),
    );

    source.poll_once().await.unwrap();
    assert_eq!(ids(&drain(&mut rx)), vec!["a"]);

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.deduped, 1);
    assert_eq!(ids(&drain(&mut rx)), vec!["b"]);
}

#[tokio::test]
async fn filtering_marks_exactly_the_kept_items() {
    // "a" appears twice in one batch; only the first survives filtering.
    let batch = FetchBatch::from_items(vec![unmarked("a"), unmarked("a"), unmarked("b")]);
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(vec![Ok(batch)]),
        PassthroughNormalizer,
        tx,
        PollConfig::default(),
    );

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.deduped, 1);
    assert!(source.dedup_window().seen("a"));
    assert!(source.dedup_window().seen("b"));
    assert_eq!(source.dedup_window().len(), 2);
    assert_eq!(ids(&drain(&mut rx)), vec!["a", "b"]);
}

struct PoisonNormalizer;

impl Normalizer for PoisonNormalizer {
    fn normalize(&self, raw: &RawEvent) -> Result<Event, NormalizeError> {
        if raw.payload.get("poison").is_some() {
            return Err(NormalizeError::Malformed("poisoned".to_string()));
        }
        Ok(Event::from_value(raw.payload.clone()))
    }
}

#[tokio::test]
async fn normalize_failure_drops_only_that_item() {
    let batch = FetchBatch::from_items(vec![
        marked("a", 1),
        RawEvent::new(json!({"id": "bad", "poison": true}))
            .with_id("bad")
            .with_marker(Marker::Seq(2)),
        marked("c", 3),
    ]);
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(vec![Ok(batch)]),
        PoisonNormalizer,
        tx,
        PollConfig::default(),
    );

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.normalize_failures, 1);
    assert_eq!(stats.delivered, 2);
    assert_eq!(ids(&drain(&mut rx)), vec!["a", "c"]);
}

#[tokio::test]
async fn fetch_failure_leaves_cursor_and_window_untouched() {
    let batches = vec![
        Err(FetchError::Decode("boom".to_string())),
        Ok(FetchBatch::from_items(vec![marked("a", 1)])),
    ];
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(batches),
        PassthroughNormalizer,
        tx,
        PollConfig::default(),
    );

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.fetched, 0);
    assert_eq!(source.cursor(), &Cursor::start());
    assert!(source.dedup_window().is_empty());
    assert!(drain(&mut rx).is_empty());

    // The loop keeps going: the next iteration delivers normally.
    source.poll_once().await.unwrap();
    assert_eq!(ids(&drain(&mut rx)), vec!["a"]);
}

#[tokio::test]
async fn cursor_is_monotonic_across_polls() {
    let batches = vec![
        Ok(FetchBatch::from_items(vec![marked("a", 3)])),
        // Late-arriving older item: excluded by the advanced cursor.
        Ok(FetchBatch::from_items(vec![marked("b", 2)])),
    ];
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(batches),
        PassthroughNormalizer,
        tx,
        PollConfig::default(),
    );

    source.poll_once().await.unwrap();
    assert_eq!(source.cursor().position(), Some(&Marker::Seq(3)));

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.delivered, 0);
    assert_eq!(source.cursor().position(), Some(&Marker::Seq(3)));
    assert_eq!(ids(&drain(&mut rx)), vec!["a"]);
}

#[tokio::test]
async fn most_recent_item_delivers_only_the_newest_first() {
    let batches = vec![
        Ok(FetchBatch::from_items(vec![
            marked("a", 30),
            marked("b", 20),
            marked("c", 10),
        ])),
        Ok(FetchBatch::from_items(vec![
            marked("d", 40),
            marked("a", 30),
            marked("b", 20),
        ])),
    ];
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(batches),
        PassthroughNormalizer,
        tx,
        PollConfig {
            most_recent_item: true,
            ..PollConfig::default()
        },
    );

    source.poll_once().await.unwrap();
    assert_eq!(ids(&drain(&mut rx)), vec!["a"]);

    source.poll_once().await.unwrap();
    assert_eq!(ids(&drain(&mut rx)), vec!["d"]);
}

#[tokio::test]
async fn skip_first_poll_marks_everything_seen() {
    let batches = vec![
        Ok(FetchBatch::from_items(vec![
            unmarked("a"),
            unmarked("b"),
            unmarked("c"),
        ])),
        Ok(FetchBatch::from_items(vec![
            unmarked("a"),
            unmarked("b"),
            unmarked("d"),
        ])),
    ];
    let (tx, mut rx) = mpsc::channel(16);
    let mut source = PollSource::new(
        ScriptedFetcher::new(batches),
        PassthroughNormalizer,
        tx,
        PollConfig {
            skip_first_poll: true,
            ..PollConfig::default()
        },
    );

    let stats = source.poll_once().await.unwrap();
    assert_eq!(stats.delivered, 0);
    assert!(drain(&mut rx).is_empty());
    for id in ["a", "b", "c"] {
        assert!(source.dedup_window().seen(id));
    }

    source.poll_once().await.unwrap();
    assert_eq!(ids(&drain(&mut rx)), vec!["d"]);
}

#[tokio::test]
async fn closed_sink_surfaces_as_an_error() {
    let (tx, rx) = mpsc::channel(16);
    drop(rx);
    let mut source = PollSource::new(
        ScriptedFetcher::new(vec![Ok(FetchBatch::from_items(vec![marked("a", 1)]))]),
        PassthroughNormalizer,
        tx,
        PollConfig::default(),
    );
    assert!(source.poll_once().await.is_err());
}

#[tokio::test]
async fn spawned_loop_shuts_down_cooperatively() {
    let batches = vec![Ok(FetchBatch::from_items(vec![marked("a", 1)]))];
    let (tx, mut rx) = mpsc::channel(16);
    let source = PollSource::new(
        ScriptedFetcher::new(batches),
        PassthroughNormalizer,
        tx,
        PollConfig {
            interval: std::time::Duration::from_millis(5),
            ..PollConfig::default()
        },
    );

    let handle = source.spawn();
    let event = rx.recv().await.expect("first event");
    assert_eq!(event.get("id"), Some(&json!("a")));

    handle.shutdown().await.unwrap();
    // No further deliveries after shutdown.
    assert!(rx.try_recv().is_err());
}
