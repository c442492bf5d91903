//! Event filters: pure transforms applied to one event at a time.
//!
//! Filters never raise to the caller. Missing required fields are soft
//! failures: the event passes through unchanged with a logged warning.

pub mod alertmanager;
pub mod endpoint_namespace;
pub mod flatten;
pub mod mqtt_publish;
pub mod poster;
