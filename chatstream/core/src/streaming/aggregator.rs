//! Fragment Aggregator
//!
//! Coalesces many small text fragments into fewer, larger emissions so a UI
//! redraws per sentence-ish chunk rather than per token.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::StreamError;

/// Default number of buffered characters that triggers a flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 32;

/// Stream adapter that buffers text until a character threshold is reached
///
/// - Emits once the buffer holds at least `threshold` characters
/// - Flushes whatever is left when upstream ends; an empty buffer produces
///   no trailing emission
/// - On an upstream error, flushes the buffer first and yields the error
///   next, then ends
/// - Never reorders text; the concatenation of all emissions equals the
///   concatenation of all fragments
pub struct FragmentAggregator<S> {
    /// `None` once upstream has ended or failed
    upstream: Option<Pin<Box<S>>>,
    buffer: String,
    /// Characters (not bytes) in `buffer`
    buffered_chars: usize,
    threshold: usize,
    /// Error held back until the buffer has been flushed
    pending_error: Option<StreamError>,
}

impl<S> FragmentAggregator<S>
where
    S: Stream<Item = Result<String, StreamError>>,
{
    /// Wrap `upstream` with the default threshold
    pub fn new(upstream: S) -> Self {
        Self::with_threshold(upstream, DEFAULT_FLUSH_THRESHOLD)
    }

    /// Wrap `upstream` with an explicit threshold (at least 1)
    pub fn with_threshold(upstream: S, threshold: usize) -> Self {
        Self {
            upstream: Some(Box::pin(upstream)),
            buffer: String::new(),
            buffered_chars: 0,
            threshold: threshold.max(1),
            pending_error: None,
        }
    }

    /// Flush threshold in characters
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn take_buffer(&mut self) -> String {
        self.buffered_chars = 0;
        std::mem::take(&mut self.buffer)
    }
}

impl<S> Stream for FragmentAggregator<S>
where
    S: Stream<Item = Result<String, StreamError>>,
{
    type Item = Result<String, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(err) = this.pending_error.take() {
                return Poll::Ready(Some(Err(err)));
            }

            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };

            match upstream.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(fragment))) => {
                    this.buffered_chars += fragment.chars().count();
                    this.buffer.push_str(&fragment);
                    if this.buffered_chars >= this.threshold {
                        tracing::trace!(chars = this.buffered_chars, "Aggregator flush");
                        return Poll::Ready(Some(Ok(this.take_buffer())));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.upstream = None;
                    if this.buffer.is_empty() {
                        return Poll::Ready(Some(Err(err)));
                    }
                    this.pending_error = Some(err);
                    return Poll::Ready(Some(Ok(this.take_buffer())));
                }
                Poll::Ready(None) => {
                    this.upstream = None;
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(this.take_buffer())));
                }
            }
        }
    }
}

/// Adds [`aggregate`](AggregateExt::aggregate) to fragment streams
pub trait AggregateExt: Stream<Item = Result<String, StreamError>> + Sized {
    /// Coalesce fragments, flushing every `threshold` characters
    fn aggregate(self, threshold: usize) -> FragmentAggregator<Self> {
        FragmentAggregator::with_threshold(self, threshold)
    }
}

impl<S> AggregateExt for S where S: Stream<Item = Result<String, StreamError>> + Sized {}
