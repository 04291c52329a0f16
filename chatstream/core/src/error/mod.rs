//! Stream Error Taxonomy
//!
//! Every failure that can end a chat stream is reported as a [`StreamError`].
//! The set of variants is closed: callers match on all of them and decide
//! what (if anything) to show the user.
//!
//! # Design Philosophy
//!
//! Failures are classified exactly once, at the point where they happen, and
//! then travel unchanged through the aggregator and the orchestrator.
//! Re-classifying an existing [`StreamError`] returns it as-is, so no layer
//! ever wraps an already-classified failure a second time.
//!
//! Cancellation is the one variant that is not a failure from the user's
//! point of view. It must stay distinguishable so surfaces can suppress it;
//! see [`StreamError::is_cancelled`] and [`StreamError::user_message`].

mod classifier;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use classifier::{classify, classify_boxed, ResetMarker};

/// Boxed error as produced by the boundary collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Original cause attached to a [`StreamError`], kept for diagnostics only
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Maximum number of body characters kept in an [`HttpStatusError`] display
const MAX_BODY_DISPLAY_CHARS: usize = 512;

/// Classified stream failure
///
/// Each variant carries a short human-readable message and, when known,
/// the original low-level cause.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Host unreachable, refused, timed out, or the connection broke
    #[error("network error: {message}")]
    Network {
        /// Human-readable description
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },

    /// The server rejected our credentials (HTTP 401)
    #[error("authentication failed: {message}")]
    Authentication {
        /// Human-readable description
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },

    /// The server throttled us (HTTP 429)
    #[error("rate limited: {message}")]
    RateLimit {
        /// Human-readable description
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },

    /// The server failed to handle a valid request (HTTP 5xx)
    #[error("server error: {message}")]
    Server {
        /// Human-readable description
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },

    /// The server rejected the request itself (other HTTP 4xx)
    #[error("request rejected: {message}")]
    Request {
        /// Human-readable description
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },

    /// The stream was stopped on purpose
    #[error("stream cancelled: {message}")]
    Cancelled {
        /// Human-readable description
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },

    /// Anything the classifier could not place
    #[error("{message}")]
    Unknown {
        /// The underlying failure's own message
        message: String,
        /// Original failure
        #[source]
        cause: Option<Cause>,
    },
}

/// Fieldless mirror of the [`StreamError`] variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamErrorKind {
    /// See [`StreamError::Network`]
    Network,
    /// See [`StreamError::Authentication`]
    Authentication,
    /// See [`StreamError::RateLimit`]
    RateLimit,
    /// See [`StreamError::Server`]
    Server,
    /// See [`StreamError::Request`]
    Request,
    /// See [`StreamError::Cancelled`]
    Cancelled,
    /// See [`StreamError::Unknown`]
    Unknown,
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Request => "request",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl StreamError {
    /// Build an error of the given kind
    pub fn new(kind: StreamErrorKind, message: impl Into<String>, cause: Option<Cause>) -> Self {
        let message = message.into();
        match kind {
            StreamErrorKind::Network => Self::Network { message, cause },
            StreamErrorKind::Authentication => Self::Authentication { message, cause },
            StreamErrorKind::RateLimit => Self::RateLimit { message, cause },
            StreamErrorKind::Server => Self::Server { message, cause },
            StreamErrorKind::Request => Self::Request { message, cause },
            StreamErrorKind::Cancelled => Self::Cancelled { message, cause },
            StreamErrorKind::Unknown => Self::Unknown { message, cause },
        }
    }

    /// Network failure without an underlying cause
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Network, message, None)
    }

    /// Cancellation triggered through the task's own token
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Cancelled {
            message: Cancelled.to_string(),
            cause: Some(Arc::new(Cancelled)),
        }
    }

    /// Failure the classifier could not place
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Unknown, message, None)
    }

    /// Classify a non-success HTTP status
    ///
    /// 401 is an authentication failure, 429 is rate limiting, 5xx is a
    /// server error and any other 4xx is a rejected request. Everything
    /// else lands in [`StreamError::Unknown`]. The status and body are kept
    /// as the cause and are reachable through [`StreamError::status`].
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let cause = HttpStatusError {
            status,
            body: body.into(),
        };
        let (kind, message) = match status {
            401 => (
                StreamErrorKind::Authentication,
                "credentials were rejected".to_string(),
            ),
            429 => (
                StreamErrorKind::RateLimit,
                "too many requests".to_string(),
            ),
            500..=599 => (StreamErrorKind::Server, format!("HTTP {status}")),
            400..=499 => (StreamErrorKind::Request, format!("HTTP {status}")),
            _ => (StreamErrorKind::Unknown, cause.to_string()),
        };
        Self::new(kind, message, Some(Arc::new(cause)))
    }

    /// The variant without its payload
    #[must_use]
    pub fn kind(&self) -> StreamErrorKind {
        match self {
            Self::Network { .. } => StreamErrorKind::Network,
            Self::Authentication { .. } => StreamErrorKind::Authentication,
            Self::RateLimit { .. } => StreamErrorKind::RateLimit,
            Self::Server { .. } => StreamErrorKind::Server,
            Self::Request { .. } => StreamErrorKind::Request,
            Self::Cancelled { .. } => StreamErrorKind::Cancelled,
            Self::Unknown { .. } => StreamErrorKind::Unknown,
        }
    }

    /// The human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::Authentication { message, .. }
            | Self::RateLimit { message, .. }
            | Self::Server { message, .. }
            | Self::Request { message, .. }
            | Self::Cancelled { message, .. }
            | Self::Unknown { message, .. } => message,
        }
    }

    /// The original failure, if one was captured
    #[must_use]
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Network { cause, .. }
            | Self::Authentication { cause, .. }
            | Self::RateLimit { cause, .. }
            | Self::Server { cause, .. }
            | Self::Request { cause, .. }
            | Self::Cancelled { cause, .. }
            | Self::Unknown { cause, .. } => cause.as_ref(),
        }
    }

    /// Whether this is a deliberate stop rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP status code, when the failure came from a non-success response
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.http_status_error().map(|e| e.status)
    }

    /// Response body, when the failure came from a non-success response
    #[must_use]
    pub fn response_body(&self) -> Option<&str> {
        self.http_status_error().map(|e| e.body.as_str())
    }

    fn http_status_error(&self) -> Option<&HttpStatusError> {
        self.cause()
            .and_then(|cause| cause.downcast_ref::<HttpStatusError>())
    }

    /// Short message suitable for showing to a user
    ///
    /// Returns `None` for cancellation, which is never displayed.
    #[must_use]
    pub fn user_message(&self) -> Option<String> {
        let text = match self {
            Self::Network { .. } => "Network error. Check your connection and try again.",
            Self::Authentication { .. } => "Authentication failed. Check your API key.",
            Self::RateLimit { .. } => "Too many requests. Please wait a moment and retry.",
            Self::Server { .. } => "The AI service is having trouble. Try again later.",
            Self::Request { .. } => "The AI service rejected the request.",
            Self::Cancelled { .. } => return None,
            Self::Unknown { message, .. } => return Some(message.clone()),
        };
        Some(text.to_string())
    }
}

/// Non-success HTTP response observed before any payload was read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {}", truncate_body(.body))]
pub struct HttpStatusError {
    /// Response status code
    pub status: u16,
    /// Response body text
    pub body: String,
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_DISPLAY_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_BODY_DISPLAY_CHARS).collect();
        format!("{head}...")
    }
}

/// Marker for a stream stopped through its own cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream cancelled by request")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(
            StreamError::from_status(401, "").kind(),
            StreamErrorKind::Authentication
        );
        assert_eq!(
            StreamError::from_status(429, "").kind(),
            StreamErrorKind::RateLimit
        );
        assert_eq!(
            StreamError::from_status(500, "").kind(),
            StreamErrorKind::Server
        );
        assert_eq!(
            StreamError::from_status(503, "").kind(),
            StreamErrorKind::Server
        );
        assert_eq!(
            StreamError::from_status(400, "").kind(),
            StreamErrorKind::Request
        );
        assert_eq!(
            StreamError::from_status(403, "").kind(),
            StreamErrorKind::Request
        );
        assert_eq!(
            StreamError::from_status(304, "").kind(),
            StreamErrorKind::Unknown
        );
    }

    #[test]
    fn test_status_and_body_are_kept() {
        let err = StreamError::from_status(503, "upstream overloaded");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.response_body(), Some("upstream overloaded"));

        let err = StreamError::network("boom");
        assert_eq!(err.status(), None);
        assert_eq!(err.response_body(), None);
    }

    #[test]
    fn test_cancelled_is_quiet() {
        let err = StreamError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), StreamErrorKind::Cancelled);
        assert!(err.user_message().is_none());
    }

    #[test]
    fn test_user_messages() {
        assert!(StreamError::network("x").user_message().is_some());
        assert_eq!(
            StreamError::unknown("weird thing").user_message(),
            Some("weird thing".to_string())
        );
    }

    #[test]
    fn test_display_includes_message() {
        let err = StreamError::network("connection refused");
        assert_eq!(err.to_string(), "network error: connection refused");
        assert_eq!(StreamError::unknown("odd").to_string(), "odd");
    }

    #[test]
    fn test_http_status_error_truncates_body() {
        let body = "x".repeat(MAX_BODY_DISPLAY_CHARS + 10);
        let err = HttpStatusError { status: 500, body };
        let shown = err.to_string();
        assert!(shown.ends_with("..."));
        assert!(shown.len() < MAX_BODY_DISPLAY_CHARS + 20);
    }

    #[test]
    fn test_source_chain_exposes_cause() {
        use std::error::Error as _;

        let err = StreamError::from_status(429, "slow down");
        let source = err.source().unwrap();
        assert!(source.to_string().contains("429"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StreamError>();
    }
}
