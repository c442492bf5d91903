//! Source adapters.
//!
//! Polling adapters (`rss`, `elastic`, `snow`, `webhooksite`, `pubsub`) pair
//! a [`Fetcher`](crate::harness::Fetcher) with a
//! [`Normalizer`](crate::harness::Normalizer) and run under the harness;
//! push adapters (`mqtt`, `nextdns`) forward straight to the sink.

pub mod elastic;
pub mod mqtt;
pub mod nextdns;
pub mod pubsub;
pub mod rss;
pub mod snow;
pub mod webhooksite;
