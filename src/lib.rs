// src/lib.rs
// Public library surface: the polling harness plus the source and filter
// plugins built on it.

pub mod config;
pub mod error;
pub mod event;
pub mod filters;
pub mod harness;
pub mod path;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::error::{FetchError, NormalizeError, SinkError};
pub use crate::event::{Event, EventObject, EventSink};
pub use crate::harness::cursor::{Cursor, Marker};
pub use crate::harness::dedup::{DedupWindow, Retention};
pub use crate::harness::{
    FetchBatch, Fetcher, Normalizer, PassthroughNormalizer, PollConfig, PollHandle, PollSource,
    PollStats, RawEvent,
};
