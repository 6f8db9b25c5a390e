//! Error types for comet-rs.
//!
//! The [`Result`] type alias is used throughout the crate. Errors fall into
//! a small number of categories:
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Protocol | `Protocol`, `Json` | connection is dropped (HTTP 400) |
//! | Transport | `Io`, `Timeout` | socket is closed, session survives |
//! | Application | `Internal` | logged, surfaced as `"internal error"` |
//! | Patch | `Delta` | caller falls back to full data |

use std::io;
use thiserror::Error;

/// Result type for comet-rs operations.
pub type Result<T> = std::result::Result<T, CometError>;

/// Errors that can occur while serving Bayeux traffic.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CometError {
    /// The request body or a Bayeux envelope was structurally invalid
    /// (malformed JSON, missing required field, wrong field type).
    ///
    /// Protocol errors terminate the connection; Bayeux-level errors
    /// (unknown clientId, bad connection type) do not raise this variant
    /// and are reported inside a reply envelope instead.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON tokenizer/serializer error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A delta patch could not be applied to the value it was made for.
    #[error("delta apply error: {0}")]
    Delta(String),

    /// Unexpected state inside the server or a user callback.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CometError {
    /// Whether this error should tear down the client connection.
    ///
    /// Bayeux-level failures are answered in-band and never reach this
    /// type; everything that does is fatal for the connection except
    /// timeouts, which release the long poll with an empty reply.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CometError::Timeout)
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        CometError::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_fatal() {
        assert!(!CometError::Timeout.is_fatal());
    }

    #[test]
    fn test_protocol_is_fatal() {
        assert!(CometError::protocol("missing channel").is_fatal());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = CometError::Delta("index 4 out of range".into());
        assert!(err.to_string().contains("index 4"));
    }
}
