//! One Chat Turn, Streamed to the Terminal
//!
//! Builds the conversation from arguments, a history file and stdin, wires the
//! core components together and copies deltas to stdout until the turn ends
//! or the user interrupts it.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use chatstream_core::config::ChatStreamConfig;
use chatstream_core::{
    ChatHistory, ChatMessage, ChatOrchestrator, ChatStream, GenerationParams,
    InMemorySessionStore, MessageRole, ReqwestClient, SessionCache, SessionId, SessionStore,
    StreamingTransport, TaskId,
};

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The provider finished the response
    Completed {
        /// Characters written
        chars: usize,
    },
    /// The user interrupted the turn
    Cancelled,
}

/// Prompt from the command line, or all of stdin when none was given
pub async fn read_prompt(words: &[String]) -> Result<String> {
    if !words.is_empty() {
        return Ok(words.join(" "));
    }

    let mut prompt = String::new();
    tokio::io::stdin()
        .read_to_string(&mut prompt)
        .await
        .context("Failed to read prompt from stdin")?;
    Ok(prompt.trim().to_string())
}

/// Assemble the conversation for this turn
///
/// Earlier messages come from `history_path` (a JSON array of messages). A
/// system message is placed first unless the history already has one.
pub async fn load_history(
    history_path: Option<&Path>,
    session_id: SessionId,
    system: Option<&str>,
    prompt: &str,
) -> Result<ChatHistory> {
    let mut history = ChatHistory::new(session_id);

    let earlier: Vec<ChatMessage> = match history_path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read history file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid history file: {}", path.display()))?
        }
        None => Vec::new(),
    };

    let has_system = earlier.iter().any(|m| m.role == MessageRole::System);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        if has_system {
            warn!("History already has a system message, ignoring --system");
        } else {
            history.push(ChatMessage::system(system));
        }
    }
    history.messages.extend(earlier);

    if !prompt.trim().is_empty() {
        history.push(ChatMessage::user(prompt));
    }
    if history.last_user_message().is_none() {
        bail!("Nothing to send: give a prompt or a history ending with a user message");
    }

    debug!(
        session_id = %history.session_id,
        messages = history.messages.len(),
        "Conversation assembled"
    );
    Ok(history)
}

/// Run one turn against the configured provider, writing to stdout
pub async fn run(
    config: &ChatStreamConfig,
    history: ChatHistory,
    params: &GenerationParams,
) -> Result<Outcome> {
    let client = ReqwestClient::with_settings(&config.client_settings())
        .context("Failed to build HTTP client")?;
    let store = Arc::new(InMemorySessionStore::new());
    let sessions = Arc::new(SessionCache::new(store, config.cache_capacity));
    let orchestrator = ChatOrchestrator::new(
        StreamingTransport::new(Arc::new(client)),
        config.provider_kind.adapter(),
        sessions,
        config.orchestrator_config(),
    );

    let stream = orchestrator.stream_chat(
        history,
        &config.provider_config(),
        params,
        TaskId::generate(),
    );

    let mut stdout = tokio::io::stdout();
    let outcome = pump(&orchestrator, stream, &mut stdout, tokio::signal::ctrl_c()).await?;
    if let Outcome::Completed { chars } = outcome {
        if chars > 0 {
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(outcome)
}

/// Copy deltas to `out` until the stream ends or `interrupt` resolves
///
/// An interrupt cancels the turn and drops the stream.
async fn pump<S, W, I>(
    orchestrator: &ChatOrchestrator<S>,
    mut stream: ChatStream,
    out: &mut W,
    interrupt: I,
) -> Result<Outcome>
where
    S: SessionStore + 'static,
    W: AsyncWrite + Unpin,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut interrupt_armed = true;
    let mut chars = 0;

    loop {
        tokio::select! {
            biased;
            signal = &mut interrupt, if interrupt_armed => {
                if let Err(e) = signal {
                    warn!(error = %e, "Interrupt handler failed");
                    interrupt_armed = false;
                    continue;
                }
                debug!(task_id = %stream.task_id(), "Interrupted, cancelling turn");
                orchestrator.cancel(stream.task_id());
                return Ok(Outcome::Cancelled);
            }
            item = stream.next() => match item {
                Some(Ok(delta)) => {
                    chars += delta.chars().count();
                    out.write_all(delta.as_bytes()).await?;
                    out.flush().await?;
                }
                Some(Err(err)) => {
                    let message = err
                        .user_message()
                        .unwrap_or_else(|| err.message().to_string());
                    return Err(anyhow::Error::new(err).context(message));
                }
                None => return Ok(Outcome::Completed { chars }),
            }
        }
    }
}
