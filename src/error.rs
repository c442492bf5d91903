//! Error taxonomy shared by the harness and the source adapters.
//!
//! The three kinds differ in blast radius: a [`FetchError`] costs one poll
//! iteration, a [`NormalizeError`] costs one item, and a [`SinkError`] ends
//! the loop and is handed back to the host scheduler.

use thiserror::Error;

/// Failure while retrieving a batch from a remote source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single raw item could not be shaped into a canonical event.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Delivery into the sink failed. Not recoverable locally; the host decides
/// whether to restart the source task.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink closed")]
    Closed,
}
