//! Streaming Transport
//!
//! Opens one server-push connection per task and turns its body into a
//! stream of payload strings.
//!
//! # Lifecycle
//!
//! ```text
//! open() ──poll──> register(task_id) ──> send ──> status check ──> lines ──> end
//!                   │ cancels prior owner          │ non-2xx: error     │
//!                   └──────────── guard released on every exit ─────────┘
//! ```
//!
//! Nothing happens until the returned stream is first polled, unless the id
//! was claimed up front with [`StreamingTransport::reserve`]. The task's
//! cancellation token is checked before every line and raced against both
//! the request and every body read, so a cancelled stream stops within one
//! read and yields [`StreamError::Cancelled`] as its last item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::client::{ByteStream, StreamRequest, StreamingClient};
use super::frame::{parse_line, LineDecoder};
use super::registry::{TaskGuard, TaskId, TaskRegistry};
use crate::error::{classify_boxed, StreamError};

/// Payload strings of one stream, in wire order
pub type PayloadStream = BoxStream<'static, Result<String, StreamError>>;

/// Upper bound on the error body read after a non-success status
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Counters describing transport activity since creation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Streams that registered and sent a request
    pub opened: u64,
    /// Streams whose body ended normally
    pub completed: u64,
    /// Streams stopped by cancellation
    pub cancelled: u64,
    /// Streams that ended with any other error
    pub failed: u64,
    /// Registrations that replaced a live stream with the same id
    pub superseded: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    opened: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
    superseded: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            opened: self.opened.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

/// A task id claimed before its request is sent
///
/// The id is live and cancellable from the moment the reservation exists.
/// Dropping an unused reservation releases the id.
pub struct Reservation {
    guard: TaskGuard,
}

impl Reservation {
    /// Task this reservation holds
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        self.guard.task().id()
    }

    /// Whether the reservation was cancelled or superseded
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.guard.task().is_cancelled()
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("task", self.guard.task())
            .finish()
    }
}

/// Server-push transport with per-task cancellation
#[derive(Clone)]
pub struct StreamingTransport {
    client: Arc<dyn StreamingClient>,
    registry: Arc<TaskRegistry>,
    stats: Arc<StatsCounters>,
}

impl StreamingTransport {
    /// Create a transport with its own empty registry
    pub fn new(client: Arc<dyn StreamingClient>) -> Self {
        Self {
            client,
            registry: Arc::new(TaskRegistry::new()),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Open a stream for `task_id`
    ///
    /// The returned stream is lazy. On first poll it cancels any stream
    /// already registered under the same id, registers itself, and sends
    /// the request.
    pub fn open(&self, request: StreamRequest, task_id: TaskId) -> PayloadStream {
        self.open_with(request, task_id, None)
    }

    /// Claim `task_id` now, cancelling any stream that holds it
    ///
    /// A cancel issued after this call reaches the stream later opened
    /// with [`open_reserved`](Self::open_reserved), even if that stream has
    /// not been polled yet.
    pub fn reserve(&self, task_id: TaskId) -> Reservation {
        Reservation {
            guard: register(&self.registry, &self.stats, task_id),
        }
    }

    /// Open a stream under an id claimed with [`reserve`](Self::reserve)
    ///
    /// The stream is lazy like [`open`](Self::open). When the reservation
    /// was cancelled first, it yields only [`StreamError::Cancelled`] and
    /// sends nothing.
    pub fn open_reserved(
        &self,
        request: StreamRequest,
        reservation: Reservation,
    ) -> PayloadStream {
        let task_id = reservation.task_id().clone();
        self.open_with(request, task_id, Some(reservation.guard))
    }

    fn open_with(
        &self,
        request: StreamRequest,
        task_id: TaskId,
        reserved: Option<TaskGuard>,
    ) -> PayloadStream {
        let state = OpenState {
            client: Arc::clone(&self.client),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            task_id,
            request: Some(request),
            guard: reserved,
            body: None,
            decoder: LineDecoder::new(),
            finished: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            let item = state.next_payload().await?;
            Some((item, state))
        })
        .boxed()
    }

    /// Cancel the stream registered under `task_id`
    ///
    /// Never fails; unknown or finished ids are ignored.
    pub fn cancel(&self, task_id: &TaskId) {
        if self.registry.cancel(task_id) {
            tracing::debug!(task_id = %task_id, "Stream cancel requested");
        }
    }

    /// Cancel every live stream
    pub fn cancel_all(&self) {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            tracing::debug!(count = cancelled, "Cancelled all streams");
        }
    }

    /// Identifiers of live streams, sorted
    #[must_use]
    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.registry.active_tasks()
    }

    /// Whether a stream is live under `task_id`
    #[must_use]
    pub fn is_active(&self, task_id: &TaskId) -> bool {
        self.registry.is_active(task_id)
    }

    /// Activity counters
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    /// The registry backing this transport
    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for StreamingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTransport")
            .field("active", &self.registry.len())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Register `task_id`, cancelling any current owner
fn register(registry: &Arc<TaskRegistry>, stats: &StatsCounters, task_id: TaskId) -> TaskGuard {
    let registration = registry.register(task_id);
    if registration.superseded {
        StatsCounters::bump(&stats.superseded);
        tracing::warn!(task_id = %registration.task.id(), "Superseding active stream");
    }
    TaskGuard::new(Arc::clone(registry), registration.task)
}

/// State carried between polls of one opened stream
struct OpenState {
    client: Arc<dyn StreamingClient>,
    registry: Arc<TaskRegistry>,
    stats: Arc<StatsCounters>,
    task_id: TaskId,
    /// Present until the first poll
    request: Option<StreamRequest>,
    /// Present while registered, or reserved ahead of the first poll;
    /// dropping it deregisters
    guard: Option<TaskGuard>,
    /// Present while the body has more chunks
    body: Option<ByteStream>,
    decoder: LineDecoder,
    finished: bool,
}

impl OpenState {
    async fn next_payload(&mut self) -> Option<Result<String, StreamError>> {
        if self.finished {
            return None;
        }

        if let Some(request) = self.request.take() {
            if let Err(err) = self.connect(request).await {
                return Some(Err(self.fail(err)));
            }
        }

        let token = self.guard.as_ref()?.task().token().clone();

        loop {
            if token.is_cancelled() {
                return Some(Err(self.fail(StreamError::cancelled())));
            }

            match self.decoder.next_line() {
                Ok(Some(line)) => {
                    if let Some(payload) = parse_line(&line) {
                        return Some(Ok(payload.to_string()));
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => return Some(Err(self.fail(classify_boxed(Box::new(err))))),
            }

            let Some(body) = self.body.as_mut() else {
                let tail = self.decoder.finish();
                self.complete();
                return tail
                    .as_deref()
                    .and_then(parse_line)
                    .map(|payload| Ok(payload.to_string()));
            };

            let next = tokio::select! {
                biased;
                () = token.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };

            match next {
                None => return Some(Err(self.fail(StreamError::cancelled()))),
                Some(Some(Ok(bytes))) => self.decoder.push(&bytes),
                Some(Some(Err(err))) => {
                    let err = if token.is_cancelled() {
                        StreamError::cancelled()
                    } else {
                        classify_boxed(err)
                    };
                    return Some(Err(self.fail(err)));
                }
                Some(None) => self.body = None,
            }
        }
    }

    async fn connect(&mut self, request: StreamRequest) -> Result<(), StreamError> {
        let guard = match self.guard.take() {
            Some(reserved) => reserved,
            None => register(&self.registry, &self.stats, self.task_id.clone()),
        };
        let token = guard.task().token().clone();
        self.guard = Some(guard);
        if token.is_cancelled() {
            return Err(StreamError::cancelled());
        }
        StatsCounters::bump(&self.stats.opened);

        tracing::debug!(
            task_id = %self.task_id,
            method = %request.method,
            url = %request.url,
            "Opening stream"
        );

        let sent = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.client.send(&request) => Some(result),
        };

        let response = match sent {
            None => return Err(StreamError::cancelled()),
            Some(Ok(response)) => response,
            Some(Err(_)) if token.is_cancelled() => return Err(StreamError::cancelled()),
            Some(Err(err)) => return Err(classify_boxed(err)),
        };

        if !response.is_success() {
            let status = response.status;
            let body = read_error_body(response.body, &token).await;
            if token.is_cancelled() {
                return Err(StreamError::cancelled());
            }
            tracing::debug!(task_id = %self.task_id, status, "Non-success status");
            return Err(StreamError::from_status(status, body));
        }

        tracing::debug!(task_id = %self.task_id, status = response.status, "Stream connected");
        self.body = Some(response.body);
        Ok(())
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        self.finished = true;
        self.body = None;
        if err.is_cancelled() {
            StatsCounters::bump(&self.stats.cancelled);
            tracing::debug!(task_id = %self.task_id, "Stream cancelled");
        } else {
            StatsCounters::bump(&self.stats.failed);
            tracing::warn!(
                task_id = %self.task_id,
                kind = %err.kind(),
                error = %err,
                "Stream failed"
            );
        }
        self.guard = None;
        err
    }

    fn complete(&mut self) {
        self.finished = true;
        StatsCounters::bump(&self.stats.completed);
        tracing::debug!(task_id = %self.task_id, "Stream completed");
        self.guard = None;
    }
}

/// Read a bounded amount of an error response body
///
/// Stops early on cancellation, on a body error, or once the limit is hit.
async fn read_error_body(mut body: ByteStream, token: &CancellationToken) -> String {
    let mut collected = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => None,
            chunk = body.next() => chunk,
        };
        match next {
            Some(Ok(bytes)) => {
                let room = MAX_ERROR_BODY_BYTES.saturating_sub(collected.len());
                collected.extend_from_slice(&bytes[..bytes.len().min(room)]);
                if collected.len() >= MAX_ERROR_BODY_BYTES {
                    break;
                }
            }
            Some(Err(_)) | None => break,
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
