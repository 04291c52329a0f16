//! ChatStream Core - Streaming Chat Transport for AI Assistants
//!
//! This crate carries a chat turn from the provider's server-push stream to
//! the caller as a sequence of readable text deltas, with no UI dependencies.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Caller / CLI                            │
//! │            stream_chat(history, provider, params, task)          │
//! │                     ▲ ChatStream (text deltas)                   │
//! └─────────────────────┼────────────────────────────────────────────┘
//!                       │
//! ┌─────────────────────┼────────────────────────────────────────────┐
//! │                ChatOrchestrator (one worker per turn)            │
//! │  ┌──────────────┐  ┌───────────────┐  ┌───────────────────────┐  │
//! │  │ SessionCache │  │ProviderAdapter│  │  FragmentAggregator   │  │
//! │  │  (recency)   │  │ (wire format) │  │ (coalesce fragments)  │  │
//! │  └──────────────┘  └───────────────┘  └───────────▲───────────┘  │
//! │                                                   │              │
//! │  ┌────────────────────────────────────────────────┴───────────┐  │
//! │  │ StreamingTransport: TaskRegistry + LineDecoder + classify  │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamingTransport`]: Opens cancellable payload streams keyed by [`TaskId`]
//! - [`FragmentAggregator`]: Coalesces small fragments into fewer deltas
//! - [`RecencyCache`]: Bounded map that evicts the least recently used entry
//! - [`SessionCache`]: Session metadata cached in front of a [`SessionStore`]
//! - [`ChatOrchestrator`]: Runs one turn end to end
//! - [`StreamError`]: The closed set of failure categories
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatstream_core::{
//!     ChatHistory, ChatMessage, ChatOrchestrator, GenerationParams, InMemorySessionStore,
//!     OrchestratorConfig, ProviderConfig, ProviderKind, ReqwestClient, SessionCache,
//!     StreamingTransport, TaskId,
//! };
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = StreamingTransport::new(Arc::new(ReqwestClient::new().unwrap()));
//!     let sessions = Arc::new(SessionCache::new(Arc::new(InMemorySessionStore::new()), 10));
//!     let orchestrator = ChatOrchestrator::new(
//!         transport,
//!         ProviderKind::OpenAi.adapter(),
//!         sessions,
//!         OrchestratorConfig::default(),
//!     );
//!
//!     let history = ChatHistory::new("s1").with_message(ChatMessage::user("Hello"));
//!     let provider = ProviderConfig::default().with_api_key("sk-...");
//!     let mut stream = orchestrator.stream_chat(
//!         history,
//!         &provider,
//!         &GenerationParams::default(),
//!         TaskId::generate(),
//!     );
//!
//!     while let Some(delta) = stream.next().await {
//!         print!("{}", delta.unwrap());
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: HTTP client seam, line framing, task registry, payload streams
//! - [`error`]: Error taxonomy and failure classification
//! - [`streaming`]: Fragment aggregation
//! - [`cache`]: Generic recency cache
//! - [`session`]: Session entities, store seam, session cache
//! - [`messages`]: Chat messages and identifiers
//! - [`adapter`]: Provider wire formats
//! - [`orchestrator`]: Per-turn pipeline
//! - [`config`]: TOML and environment configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod messages;
pub mod orchestrator;
pub mod session;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use adapter::{
    AdapterError, GenerationParams, OpenAiCompatAdapter, PayloadEvent, PlainTextAdapter,
    ProviderAdapter, ProviderConfig, ProviderKind,
};
pub use cache::{CacheStats, RecencyCache};
pub use error::{classify, classify_boxed, BoxError, StreamError, StreamErrorKind};
pub use messages::{ChatHistory, ChatMessage, MessageRole, SessionId};
pub use orchestrator::{ChatOrchestrator, ChatStream, OrchestratorConfig};
pub use session::{
    InMemorySessionStore, SessionCache, SessionEntity, SessionMetadata, SessionStore, StoreError,
};
pub use streaming::{AggregateExt, FragmentAggregator};
pub use transport::{
    ClientSettings, PayloadStream, Reservation, ReqwestClient, StreamRequest, StreamResponse,
    StreamingClient, StreamingTransport, TaskId, TaskRegistry, TransportStats,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatStreamConfig, ConfigError,
    ConfigSource,
};
