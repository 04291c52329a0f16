//! Failure classification
//!
//! Maps any low-level failure onto the closed [`StreamError`] taxonomy. The
//! ladder is evaluated top to bottom and the first rule that matches wins;
//! each rule inspects the failure and its full `source()` chain.
//!
//! 1. already classified
//! 2. cooperative cancellation
//! 3. timeout
//! 4. connect failure
//! 5. generic I/O failure, split on [`ResetMarker`]
//! 6. unknown
//!
//! Reset markers are a fallback only. The transport detects its own
//! cancellation through the task token before any failure reaches this
//! module, so an unconfirmed reset stays a network error.

use std::error::Error;
use std::io;
use std::sync::Arc;

use super::{BoxError, Cancelled, StreamError, StreamErrorKind};

/// Text fragments that identify a peer reset caused by cancellation
///
/// Matching is case-insensitive against the display text of every link in
/// the failure chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResetMarker {
    /// HTTP/2 `CANCEL` reset reason, and "canceled"/"cancelled" wording
    Cancel,
    /// hyper's description of the `CANCEL` reason
    StreamNoLongerNeeded,
    /// Socket torn down underneath an in-flight read
    SocketClosed,
}

impl ResetMarker {
    /// Every recognized marker
    pub const ALL: [Self; 3] = [Self::Cancel, Self::StreamNoLongerNeeded, Self::SocketClosed];

    /// Lowercase fragment searched for in error text
    #[must_use]
    pub fn pattern(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::StreamNoLongerNeeded => "stream no longer needed",
            Self::SocketClosed => "socket closed",
        }
    }

    /// First marker found in `text`, if any
    #[must_use]
    pub fn find(text: &str) -> Option<Self> {
        let lowered = text.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|marker| lowered.contains(marker.pattern()))
    }
}

/// Outcome of running the ladder over a borrowed failure
enum Verdict {
    Existing(StreamError),
    Classified(StreamErrorKind, String),
}

/// Classify a borrowed failure
///
/// The result carries no cause because the failure is only borrowed; use
/// [`classify_boxed`] when the original should stay attached.
#[must_use]
pub fn classify(failure: &(dyn Error + 'static)) -> StreamError {
    match inspect(failure) {
        Verdict::Existing(existing) => existing,
        Verdict::Classified(kind, message) => StreamError::new(kind, message, None),
    }
}

/// Classify an owned failure, keeping it as the cause
#[must_use]
pub fn classify_boxed(failure: BoxError) -> StreamError {
    let failure = match failure.downcast::<StreamError>() {
        Ok(existing) => return *existing,
        Err(other) => other,
    };
    match inspect(failure.as_ref()) {
        Verdict::Existing(existing) => existing,
        Verdict::Classified(kind, message) => {
            StreamError::new(kind, message, Some(Arc::from(failure)))
        }
    }
}

fn inspect(failure: &(dyn Error + 'static)) -> Verdict {
    if let Some(existing) = chain(failure).find_map(|link| link.downcast_ref::<StreamError>()) {
        return Verdict::Existing(existing.clone());
    }

    if chain(failure).any(is_cancellation) {
        return Verdict::Classified(StreamErrorKind::Cancelled, Cancelled.to_string());
    }

    if chain(failure).any(is_timeout) {
        return Verdict::Classified(StreamErrorKind::Network, "request timed out".into());
    }

    if chain(failure).any(is_refused) {
        return Verdict::Classified(StreamErrorKind::Network, "connection refused".into());
    }
    if chain(failure).any(is_unreachable) {
        return Verdict::Classified(StreamErrorKind::Network, "cannot reach host".into());
    }

    if chain(failure).any(is_io_failure) {
        let marker = chain(failure).find_map(|link| ResetMarker::find(&link.to_string()));
        return match marker {
            Some(marker) => Verdict::Classified(
                StreamErrorKind::Cancelled,
                format!("peer reset ({})", marker.pattern()),
            ),
            None => Verdict::Classified(StreamErrorKind::Network, "connection error".into()),
        };
    }

    Verdict::Classified(StreamErrorKind::Unknown, failure.to_string())
}

/// The failure followed by its sources
///
/// `io::Error` hides its inner error from `source()`, so the walk steps
/// into it explicitly.
fn chain<'a>(
    failure: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(failure), |&link| next_link(link))
}

fn next_link<'a>(link: &'a (dyn Error + 'static)) -> Option<&'a (dyn Error + 'static)> {
    if let Some(inner) = link.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
        return Some(inner);
    }
    link.source()
}

fn is_cancellation(link: &(dyn Error + 'static)) -> bool {
    if link.is::<Cancelled>() {
        return true;
    }
    link.downcast_ref::<tokio::task::JoinError>()
        .is_some_and(tokio::task::JoinError::is_cancelled)
}

fn is_timeout(link: &(dyn Error + 'static)) -> bool {
    if link.is::<tokio::time::error::Elapsed>() {
        return true;
    }
    if let Some(err) = link.downcast_ref::<reqwest::Error>() {
        return err.is_timeout();
    }
    link.downcast_ref::<io::Error>()
        .is_some_and(|err| err.kind() == io::ErrorKind::TimedOut)
}

fn is_refused(link: &(dyn Error + 'static)) -> bool {
    link.downcast_ref::<io::Error>()
        .is_some_and(|err| err.kind() == io::ErrorKind::ConnectionRefused)
}

fn is_unreachable(link: &(dyn Error + 'static)) -> bool {
    if let Some(err) = link.downcast_ref::<reqwest::Error>() {
        return err.is_connect();
    }
    link.downcast_ref::<io::Error>()
        .is_some_and(|err| err.kind() == io::ErrorKind::AddrNotAvailable)
}

fn is_io_failure(link: &(dyn Error + 'static)) -> bool {
    if link.is::<io::Error>() {
        return true;
    }
    link.downcast_ref::<reqwest::Error>()
        .is_some_and(|err| err.is_body() || err.is_request() || err.is_decode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("transport wrapper")]
    struct Wrapper {
        #[source]
        inner: io::Error,
    }

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct Plain(String);

    // ========================================================================
    // Ladder rules
    // ========================================================================

    #[test]
    fn test_existing_error_is_unchanged() {
        let original = StreamError::from_status(429, "slow down");
        let classified = classify(&original);
        assert_eq!(classified.kind(), StreamErrorKind::RateLimit);
        assert_eq!(classified.status(), Some(429));

        let boxed = classify_boxed(Box::new(StreamError::network("flaky")));
        assert_eq!(boxed.kind(), StreamErrorKind::Network);
        assert_eq!(boxed.message(), "flaky");
    }

    #[test]
    fn test_nested_classified_error_is_not_rewrapped() {
        let wrapped = io::Error::other(StreamError::from_status(401, ""));
        let classified = classify(&wrapped);
        assert_eq!(classified.kind(), StreamErrorKind::Authentication);
        assert_eq!(classified.status(), Some(401));
    }

    #[test]
    fn test_cancelled_marker() {
        assert!(classify(&Cancelled).is_cancelled());
        assert!(classify(&io::Error::other(Cancelled)).is_cancelled());
    }

    #[tokio::test]
    async fn test_aborted_join_is_cancelled() {
        let handle = tokio::spawn(futures::future::pending::<()>());
        handle.abort();
        let join_error = handle.await.unwrap_err();
        assert!(classify(&join_error).is_cancelled());
    }

    #[tokio::test]
    async fn test_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(
            Duration::from_millis(1),
            futures::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        let classified = classify(&elapsed);
        assert_eq!(classified.kind(), StreamErrorKind::Network);
        assert_eq!(classified.message(), "request timed out");
    }

    #[test]
    fn test_io_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        assert_eq!(classify(&err).message(), "request timed out");
    }

    #[test]
    fn test_connection_refused() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let classified = classify(&err);
        assert_eq!(classified.kind(), StreamErrorKind::Network);
        assert_eq!(classified.message(), "connection refused");
    }

    #[test]
    fn test_address_not_available_is_unreachable() {
        let err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no route");
        assert_eq!(classify(&err).message(), "cannot reach host");
    }

    #[tokio::test]
    async fn test_reqwest_connect_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = reqwest::get(format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap_err();
        let classified = classify(&err);
        assert_eq!(classified.kind(), StreamErrorKind::Network);
        assert!(
            classified.message() == "connection refused"
                || classified.message() == "cannot reach host"
        );
    }

    // ========================================================================
    // Reset markers
    // ========================================================================

    #[test]
    fn test_confirmed_cancel_markers_are_cancelled() {
        let texts = [
            "stream error received: stream no longer needed",
            "operation was canceled",
            "request cancelled by peer",
            "socket closed",
            "stream reset: CANCEL",
        ];
        for text in texts {
            let err = io::Error::new(io::ErrorKind::ConnectionReset, text);
            assert!(classify(&err).is_cancelled(), "expected cancel for {text}");
        }
    }

    #[test]
    fn test_ambiguous_reset_is_network() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        let classified = classify(&err);
        assert_eq!(classified.kind(), StreamErrorKind::Network);
        assert_eq!(classified.message(), "connection error");
    }

    #[test]
    fn test_marker_found_deep_in_chain() {
        let err = Wrapper {
            inner: io::Error::other(Plain("socket closed".into())),
        };
        assert!(classify(&err).is_cancelled());
    }

    #[test]
    fn test_marker_without_io_failure_is_unknown() {
        let classified = classify(&Plain("user cancelled the plan".into()));
        assert_eq!(classified.kind(), StreamErrorKind::Unknown);
    }

    #[test]
    fn test_reset_marker_find() {
        assert_eq!(ResetMarker::find("CANCEL"), Some(ResetMarker::Cancel));
        assert_eq!(
            ResetMarker::find("Stream No Longer Needed"),
            Some(ResetMarker::StreamNoLongerNeeded)
        );
        assert_eq!(ResetMarker::find("broken pipe"), None);
        assert_eq!(ResetMarker::ALL.len(), 3);
    }

    // ========================================================================
    // Fallback
    // ========================================================================

    #[test]
    fn test_unknown_keeps_message() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let expected = err.to_string();
        let classified = classify(&err);
        assert_eq!(classified.kind(), StreamErrorKind::Unknown);
        assert_eq!(classified.message(), expected);
    }

    #[test]
    fn test_boxed_keeps_cause() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let classified = classify_boxed(Box::new(err));
        assert_eq!(classified.kind(), StreamErrorKind::Network);
        let cause = classified.cause().unwrap();
        assert!(cause.downcast_ref::<io::Error>().is_some());
    }
}
