//! Error types shared across the relay.
//!
//! Most of the pipeline is best-effort and turns failures into empty results
//! plus a log line. The variants here cover the places where a failure has to
//! travel: HTTP fetches, the durable store, the delivery channel and startup
//! configuration.

use thiserror::Error;

/// The main error type for relay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A feed document could not be parsed.
    #[error("feed parse error: {0}")]
    Feed(String),

    /// The delivery channel rejected or failed to send a post.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The publish worker has stopped accepting requests.
    #[error("publish service is not running")]
    ServiceClosed,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = Error::Status {
            status: 503,
            url: "https://example.com/rss".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected status 503 for https://example.com/rss"
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?
        }
        assert!(matches!(fails(), Err(Error::Io(_))));
    }
}
