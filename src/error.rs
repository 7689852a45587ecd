//! Error types
//!
//! Failures surfaced by the archive writer and the request helpers. Body
//! drain failures never show up here: the converter degrades them locally.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive writer is already closed")]
    Closed,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
}

/// Result type for the kiroku crate
pub type Result<T> = std::result::Result<T, Error>;
