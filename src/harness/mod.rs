//! Polling event source harness.
//!
//! Drives an adapter-supplied [`Fetcher`] and [`Normalizer`] through the
//! fetch → filter → normalize → deliver cycle on a fixed interval. Failures
//! are isolated per iteration (fetch) or per item (normalize); redelivery is
//! suppressed by a bounded [`DedupWindow`](dedup::DedupWindow) with
//! mark-before-deliver semantics.

pub mod cursor;
pub mod dedup;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{FetchError, NormalizeError, SinkError};
use crate::event::{Event, EventSink};
use self::cursor::{Cursor, Marker};
use self::dedup::{DedupWindow, Retention};

/// Process-wide default poll interval, used when a source does not set one.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// One-time metrics registration (so series show up on scrape).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("source_events_total", "Raw items returned by fetchers.");
        describe_counter!(
            "source_delivered_total",
            "Normalized events delivered to the sink."
        );
        describe_counter!(
            "source_dedup_total",
            "Items suppressed by the dedup window."
        );
        describe_counter!(
            "source_fetch_errors_total",
            "Fetch failures (one per iteration)."
        );
        describe_counter!(
            "source_normalize_errors_total",
            "Items dropped during normalization."
        );
        describe_histogram!("source_fetch_ms", "Fetch time in milliseconds.");
        describe_gauge!("source_last_poll_ts", "Unix ts of the last completed poll.");
    });
}

/// One raw item as returned by a fetcher.
///
/// `id` feeds the dedup window and `marker` feeds the cursor; either may be
/// absent, in which case the other mechanism alone suppresses redelivery.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub id: Option<String>,
    pub marker: Option<Marker>,
    pub payload: Value,
}

impl RawEvent {
    pub fn new(payload: Value) -> Self {
        Self {
            id: None,
            marker: None,
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }
}

/// A batch of raw items plus the fetcher's idea of the next consumption point.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub items: Vec<RawEvent>,
    /// Feed-level recency hint (e.g. a channel build date). Folded into the
    /// cursor together with the markers of delivered items.
    pub cursor_candidate: Option<Marker>,
}

impl FetchBatch {
    pub fn from_items(items: Vec<RawEvent>) -> Self {
        Self {
            items,
            cursor_candidate: None,
        }
    }
}

/// Adapter capability: retrieve items not yet consumed relative to a cursor.
#[async_trait]
pub trait Fetcher: Send {
    async fn fetch(&mut self, cursor: &Cursor) -> Result<FetchBatch, FetchError>;

    /// Source name used in logs.
    fn name(&self) -> &str;

    /// Starting consumption point for a fresh loop.
    fn initial_cursor(&self) -> Cursor {
        Cursor::start()
    }
}

/// Adapter capability: shape one raw item into the canonical event form.
pub trait Normalizer: Send {
    fn normalize(&self, raw: &RawEvent) -> Result<Event, NormalizeError>;
}

/// Passes the raw payload through unchanged, plus the `meta` envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughNormalizer;

impl Normalizer for PassthroughNormalizer {
    fn normalize(&self, raw: &RawEvent) -> Result<Event, NormalizeError> {
        Ok(Event::from_value(raw.payload.clone()))
    }
}

/// Per-source loop configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between polls.
    pub interval: Duration,
    /// Dedup window retention.
    pub retention: Retention,
    /// Deliver only the newest item on the very first iteration.
    pub most_recent_item: bool,
    /// Mark everything seen on the first iteration without delivering.
    pub skip_first_poll: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            retention: Retention::default(),
            most_recent_item: false,
            skip_first_poll: false,
        }
    }
}

/// Counters for one pass, mostly useful in tests and logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub fetched: usize,
    pub deduped: usize,
    pub delivered: usize,
    pub normalize_failures: usize,
}

/// The poll loop: owns one cursor and one dedup window for one source.
pub struct PollSource<F, N, S> {
    fetcher: F,
    normalizer: N,
    sink: S,
    config: PollConfig,
    cursor: Cursor,
    dedup: DedupWindow,
    first_poll: bool,
}

impl<F, N, S> PollSource<F, N, S>
where
    F: Fetcher,
    N: Normalizer,
    S: EventSink,
{
    pub fn new(fetcher: F, normalizer: N, sink: S, config: PollConfig) -> Self {
        let cursor = fetcher.initial_cursor();
        let dedup = DedupWindow::new(config.retention);
        Self {
            fetcher,
            normalizer,
            sink,
            config,
            cursor,
            dedup,
            first_poll: true,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn dedup_window(&self) -> &DedupWindow {
        &self.dedup
    }

    /// Run a single fetch → filter → normalize → deliver pass.
    ///
    /// Fetch failures are logged and cost the whole iteration; normalize
    /// failures are logged and cost one item. Only a sink failure escapes.
    pub async fn poll_once(&mut self) -> Result<PollStats, SinkError> {
        ensure_metrics_described();
        let mut stats = PollStats::default();
        let now = unix_now();
        self.dedup.evict(now);

        let started = Instant::now();
        let batch = match self.fetcher.fetch(&self.cursor).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::warn!(
                    source = self.fetcher.name(),
                    error = %error,
                    "fetch failed; retrying next interval"
                );
                counter!("source_fetch_errors_total").increment(1);
                return Ok(stats);
            }
        };
        histogram!("source_fetch_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        let FetchBatch {
            items,
            cursor_candidate,
        } = batch;
        stats.fetched = items.len();
        counter!("source_events_total").increment(items.len() as u64);

        // FILTERING: cursor first, then mark-before-deliver in the window.
        let mut fresh: Vec<RawEvent> = Vec::with_capacity(items.len());
        for item in items {
            if !self.cursor.admits(item.marker.as_ref()) {
                continue;
            }
            if let Some(id) = item.id.as_deref() {
                if !self.dedup.mark(id, now) {
                    stats.deduped += 1;
                    counter!("source_dedup_total").increment(1);
                    continue;
                }
            }
            fresh.push(item);
        }

        let mut to_deliver = if self.first_poll {
            self.first_poll = false;
            if self.config.skip_first_poll {
                tracing::debug!(
                    source = self.fetcher.name(),
                    discovered = fresh.len(),
                    "first poll: marking items seen without delivering"
                );
                Vec::new()
            } else if self.config.most_recent_item {
                newest_only(fresh)
            } else {
                fresh
            }
        } else {
            fresh
        };

        // NORMALIZING + DELIVERING, oldest first. Unmarked items keep their
        // source order and go ahead of marked ones.
        to_deliver.sort_by(|a, b| a.marker.cmp(&b.marker));
        let mut delivered_markers = Vec::new();
        for item in to_deliver {
            let event = match self.normalizer.normalize(&item) {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(
                        source = self.fetcher.name(),
                        id = item.id.as_deref().unwrap_or("-"),
                        error = %error,
                        "dropping item that failed normalization"
                    );
                    stats.normalize_failures += 1;
                    counter!("source_normalize_errors_total").increment(1);
                    continue;
                }
            };
            self.sink.put(event).await?;
            stats.delivered += 1;
            counter!("source_delivered_total").increment(1);
            if let Some(marker) = item.marker {
                delivered_markers.push(marker);
            }
        }

        self.cursor = self.cursor.advanced(cursor_candidate, delivered_markers);
        gauge!("source_last_poll_ts").set(now as f64);
        Ok(stats)
    }

    /// Poll forever at the configured interval.
    pub async fn run(mut self) -> Result<(), SinkError> {
        loop {
            self.poll_once().await?;
            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// Poll until `shutdown` flips to true. The signal is observed between
    /// pipeline phases, never mid-item; no deliveries happen after it fires.
    pub async fn run_until(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SinkError> {
        while !*shutdown.borrow() {
            self.poll_once().await?;
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Controller gone; keep polling on the bare interval.
                        return self.run().await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Spawn the loop as a cooperative task.
    pub fn spawn(self) -> PollHandle
    where
        F: 'static,
        N: 'static,
        S: 'static,
    {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run_until(rx));
        PollHandle { shutdown: tx, task }
    }
}

/// Keep only the newest item: the one with the maximum marker, falling back
/// to feed order (first item) when no marker is present.
fn newest_only(mut items: Vec<RawEvent>) -> Vec<RawEvent> {
    if items.is_empty() {
        return items;
    }
    let newest = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.marker.is_some())
        .max_by(|(_, a), (_, b)| a.marker.cmp(&b.marker))
        .map(|(index, _)| index)
        .unwrap_or(0);
    vec![items.swap_remove(newest)]
}

/// Handle to a spawned poll loop.
pub struct PollHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), SinkError>>,
}

impl PollHandle {
    /// Request a cooperative stop and wait for the loop to wind down.
    pub async fn shutdown(self) -> Result<(), SinkError> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_cancelled() => Ok(()),
            Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
        }
    }

    /// Hard-cancel at the loop's next suspension point.
    pub fn abort(&self) {
        self.task.abort();
    }
}

pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
