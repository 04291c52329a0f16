//! Streaming Orchestrator
//!
//! Runs one conversational turn end to end:
//!
//! ```text
//!            ┌──────────── SessionCache ────────────┐
//!            │ resolve                      refresh │
//!            ▼                                      │
//! stream_chat ──> adapter.build_request ──> transport.open ──> decode ──> aggregate ──> ChatStream
//! ```
//!
//! # Design
//!
//! - One spawned worker per turn; the caller only ever polls a channel
//! - Deltas keep wire order; turns with different task ids never interact
//! - Cancellation (explicit, superseded, or the consumer dropping the
//!   [`ChatStream`]) ends the stream without an error item
//! - Every other failure arrives as exactly one [`StreamError`], after any
//!   text that was already buffered

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::ready;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::adapter::{GenerationParams, PayloadEvent, ProviderAdapter, ProviderConfig};
use crate::error::{classify_boxed, StreamError, StreamErrorKind};
use crate::messages::{ChatHistory, SessionId};
use crate::session::{SessionCache, SessionStore};
use crate::streaming::{FragmentAggregator, DEFAULT_FLUSH_THRESHOLD};
use crate::transport::{Reservation, StreamingTransport, TaskId};

/// Default capacity of the delta channel between worker and caller
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default length of the session list preview, in characters
pub const DEFAULT_PREVIEW_CHARS: usize = 120;

/// Orchestrator tuning
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Characters buffered before a delta is emitted
    pub flush_threshold: usize,
    /// Deltas buffered between worker and caller
    pub channel_capacity: usize,
    /// Maximum characters kept as the session preview
    pub preview_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

/// Aggregated deltas of one turn
///
/// Ends after the last delta, after a single error, or silently on
/// cancellation. Dropping it cancels the turn.
pub struct ChatStream {
    task_id: TaskId,
    inner: ReceiverStream<Result<String, StreamError>>,
}

impl ChatStream {
    /// Task this stream belongs to
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Drain the stream into one string
    ///
    /// # Errors
    ///
    /// Returns the first error the turn produced.
    pub async fn collect_text(mut self) -> Result<String, StreamError> {
        let mut text = String::new();
        while let Some(delta) = self.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }
}

impl Stream for ChatStream {
    type Item = Result<String, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// Entry point for streaming chat turns
pub struct ChatOrchestrator<S> {
    transport: StreamingTransport,
    adapter: Arc<dyn ProviderAdapter>,
    sessions: Arc<SessionCache<S>>,
    config: OrchestratorConfig,
}

impl<S> Clone for ChatOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            adapter: Arc::clone(&self.adapter),
            sessions: Arc::clone(&self.sessions),
            config: self.config.clone(),
        }
    }
}

impl<S> ChatOrchestrator<S>
where
    S: SessionStore + 'static,
{
    /// Create an orchestrator
    pub fn new(
        transport: StreamingTransport,
        adapter: Arc<dyn ProviderAdapter>,
        sessions: Arc<SessionCache<S>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transport,
            adapter,
            sessions,
            config,
        }
    }

    /// Stream one turn
    ///
    /// Returns immediately; the work happens on a spawned task. The task id
    /// is claimed before returning, so a turn already running under it is
    /// cancelled and a [`cancel`](Self::cancel) issued right away is never
    /// lost.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn stream_chat(
        &self,
        history: ChatHistory,
        provider: &ProviderConfig,
        params: &GenerationParams,
        task_id: TaskId,
    ) -> ChatStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let reservation = self.transport.reserve(task_id.clone());

        let turn = Turn {
            transport: self.transport.clone(),
            adapter: Arc::clone(&self.adapter),
            sessions: Arc::clone(&self.sessions),
            config: self.config.clone(),
            history,
            provider: provider.clone(),
            params: params.clone(),
            task_id: task_id.clone(),
        };
        tokio::spawn(turn.run(reservation, tx));

        ChatStream {
            task_id,
            inner: ReceiverStream::new(rx),
        }
    }

    /// Cancel the turn running under `task_id`; unknown ids are ignored
    pub fn cancel(&self, task_id: &TaskId) {
        self.transport.cancel(task_id);
    }

    /// Cancel every running turn
    pub fn cancel_all(&self) {
        self.transport.cancel_all();
    }

    /// Task ids with a live connection
    #[must_use]
    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.transport.active_tasks()
    }

    /// The session cache
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionCache<S>> {
        &self.sessions
    }

    /// The transport
    #[must_use]
    pub fn transport(&self) -> &StreamingTransport {
        &self.transport
    }

    /// The tuning in effect
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Everything a worker owns for one turn
struct Turn<S> {
    transport: StreamingTransport,
    adapter: Arc<dyn ProviderAdapter>,
    sessions: Arc<SessionCache<S>>,
    config: OrchestratorConfig,
    history: ChatHistory,
    provider: ProviderConfig,
    params: GenerationParams,
    task_id: TaskId,
}

type DeltaSender = mpsc::Sender<Result<String, StreamError>>;

impl<S> Turn<S>
where
    S: SessionStore + 'static,
{
    /// Drive the turn; `reservation` holds the task id until the request
    /// goes out
    async fn run(self, reservation: Reservation, tx: DeltaSender) {
        let started = Instant::now();
        let session_id = self.history.session_id.clone();

        let session = match self.sessions.load(&session_id).await {
            Ok(session) => session,
            Err(_) if reservation.is_cancelled() => {
                tracing::debug!(task_id = %self.task_id, "Turn cancelled");
                return;
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "Failed to resolve session");
                let err = StreamError::new(
                    StreamErrorKind::Unknown,
                    format!("failed to load session: {err}"),
                    Some(Arc::new(err)),
                );
                let _ = tx.send(Err(err)).await;
                return;
            }
        };
        tracing::debug!(
            task_id = %self.task_id,
            session_id = %session.id,
            adapter = self.adapter.name(),
            "Turn started"
        );

        let request = match self
            .adapter
            .build_request(&self.history, &self.provider, &self.params)
        {
            Ok(request) => request,
            Err(_) if reservation.is_cancelled() => {
                tracing::debug!(task_id = %self.task_id, "Turn cancelled");
                return;
            }
            Err(err) => {
                let _ = tx.send(Err(classify_boxed(Box::new(err)))).await;
                return;
            }
        };

        let adapter = Arc::clone(&self.adapter);
        let text = self
            .transport
            .open_reserved(request, reservation)
            .map(move |item| item.and_then(|payload| adapter.decode_payload(&payload)))
            .try_take_while(|event| ready(Ok::<_, StreamError>(*event != PayloadEvent::Done)))
            .try_filter_map(|event| {
                ready(Ok::<_, StreamError>(match event {
                    PayloadEvent::Text(text) => Some(text),
                    PayloadEvent::Skip | PayloadEvent::Done => None,
                }))
            });
        let mut deltas = FragmentAggregator::with_threshold(text, self.config.flush_threshold);

        let mut full_text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                () = tx.closed() => {
                    tracing::debug!(task_id = %self.task_id, "Consumer dropped the stream");
                    return;
                }
                next = deltas.next() => next,
            };

            match next {
                None => break,
                Some(Ok(delta)) => {
                    full_text.push_str(&delta);
                    if tx.send(Ok(delta)).await.is_err() {
                        return;
                    }
                }
                Some(Err(err)) if err.is_cancelled() => {
                    tracing::debug!(task_id = %self.task_id, "Turn cancelled");
                    return;
                }
                Some(Err(err)) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
        drop(deltas);

        self.refresh_session(&session_id, &full_text).await;

        tracing::info!(
            task_id = %self.task_id,
            session_id = %session_id,
            chars = full_text.chars().count(),
            elapsed_ms = started.elapsed().as_millis(),
            "Turn completed"
        );
    }

    async fn refresh_session(&self, session_id: &SessionId, full_text: &str) {
        let preview = preview_text(full_text, self.config.preview_chars);
        let model = self.provider.model.clone();

        let result = self
            .sessions
            .update(session_id, move |session| {
                if !preview.is_empty() {
                    session.metadata.preview = Some(preview);
                }
                session.metadata.default_model = Some(model);
                session.metadata.last_draft = None;
            })
            .await;

        if let Err(err) = result {
            tracing::warn!(session_id = %session_id, error = %err, "Failed to persist session");
        }
    }
}

/// Whitespace-collapsed prefix of `text`, at most `max_chars` characters
fn preview_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut preview: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    preview.push_str("...");
    preview
}
