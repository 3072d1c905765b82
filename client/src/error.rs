//! Error types for the coordination layer.
//!
//! The variants mirror how failures are handled, not just where they occur:
//!
//! - [`Error::AuthMissing`] - no token at connect time; reported immediately,
//!   never retried.
//! - [`Error::Transport`] - socket/protocol failure; the connection service
//!   retries with bounded linear backoff.
//! - [`Error::ReconnectExhausted`] - the backoff ladder ran out; surfaced as
//!   a terminal error, after which a fresh `connect()` starts over.
//! - [`Error::Api`] - the backend envelope carried a non-success status; the
//!   message is server-authored and shown to the user as-is, not retried.
//! - [`Error::Timeout`] - the client-side request timeout, distinct from an
//!   application error.
//!
//! Malformed inbound frames are deliberately NOT an error variant: they are
//! logged and dropped inside the subscription handlers and never propagate.

use thiserror::Error;

/// Convenience result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the coordination layer.
#[derive(Error, Debug)]
pub enum Error {
    /// No bearer token was available at connect time.
    #[error("no access token available for realtime connection")]
    AuthMissing,

    /// Underlying socket or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Automatic reconnection gave up after the configured attempt cap.
    #[error("failed to reconnect after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// The backend envelope carried a non-success status.
    ///
    /// `message` is authored by the server for end users; callers display it
    /// directly.
    #[error("{message}")]
    Api {
        /// Envelope status string, e.g. `404 NOT_FOUND`
        status: String,
        /// Server-supplied, user-displayable message
        message: String,
    },

    /// Client-side request timeout (distinct from an application error).
    #[error("request timed out")]
    Timeout,

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Subscription bookkeeping failure (connection service gone, stream
    /// already claimed, ...).
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl Error {
    /// True when the error is the backend saying "not found".
    ///
    /// Certain list/statistics endpoints treat absence as an empty result
    /// rather than a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status, .. } if status.starts_with("404"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_displays_server_message_only() {
        let err = Error::Api {
            status: "409 CONFLICT".to_string(),
            message: "Seat already held".to_string(),
        };
        assert_eq!(err.to_string(), "Seat already held");
    }

    #[test]
    fn not_found_detection() {
        let err = Error::Api {
            status: "404 NOT_FOUND".to_string(),
            message: "no pre-registrations".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!Error::Timeout.is_not_found());
    }
}
