//! Provider Adapters
//!
//! Everything that differs between AI providers lives behind
//! [`ProviderAdapter`]: how a turn becomes an HTTP request, and how one
//! payload line becomes text.
//!
//! # Supported Providers
//!
//! - [`OpenAiCompatAdapter`]: `POST {base_url}/chat/completions` with
//!   `stream: true`; payloads are JSON chunks ending with `[DONE]`
//! - [`PlainTextAdapter`]: `POST {base_url}`; every payload is text

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{StreamError, StreamErrorKind};
use crate::messages::{ChatHistory, ChatMessage};
use crate::transport::StreamRequest;

/// Default OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model name
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Sentinel payload that ends an OpenAI-compatible stream
const DONE_SENTINEL: &str = "[DONE]";

/// Which adapter a provider speaks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat-completions streaming
    #[default]
    #[serde(rename = "openai", alias = "openai_compat")]
    OpenAi,
    /// Raw text lines
    PlainText,
}

impl ProviderKind {
    /// Adapter implementing this kind
    #[must_use]
    pub fn adapter(self) -> Arc<dyn ProviderAdapter> {
        match self {
            Self::OpenAi => Arc::new(OpenAiCompatAdapter),
            Self::PlainText => Arc::new(PlainTextAdapter),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::PlainText => write!(f, "plain_text"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "open_ai" | "openai_compat" => Ok(Self::OpenAi),
            "plain" | "plain_text" | "text" => Ok(Self::PlainText),
            other => Err(AdapterError::InvalidRequest(format!(
                "unknown provider kind '{other}'"
            ))),
        }
    }
}

/// Where and as whom to send a turn
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Endpoint base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,
    /// Additional headers sent with every request
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Create a provider config without credentials
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            extra_headers: Vec::new(),
        }
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_MODEL)
    }
}

// The key must never reach logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("extra_headers", &self.extra_headers.len())
            .finish()
    }
}

/// Sampling parameters for one turn
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Nucleus sampling mass
    pub top_p: Option<f32>,
    /// Stop sequences
    pub stop: Vec<String>,
}

impl GenerationParams {
    /// Set temperature (builder pattern)
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens (builder pattern)
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What one payload line means
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadEvent {
    /// Text to show
    Text(String),
    /// Nothing to show (keep-alive, role-only delta, unknown field)
    Skip,
    /// The provider has finished; ignore anything after this
    Done,
}

/// Failure to build a request
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The turn cannot be expressed as a request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Encoding the request body failed
    #[error("failed to encode request: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Provider-specific request building and payload decoding
pub trait ProviderAdapter: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &'static str;

    /// Build the streaming request for one turn
    ///
    /// # Errors
    ///
    /// Returns an error if the history is empty or cannot be encoded.
    fn build_request(
        &self,
        history: &ChatHistory,
        provider: &ProviderConfig,
        params: &GenerationParams,
    ) -> Result<StreamRequest, AdapterError>;

    /// Interpret one payload line
    ///
    /// # Errors
    ///
    /// Returns a classified error when the payload reports a provider-side
    /// failure or cannot be understood.
    fn decode_payload(&self, payload: &str) -> Result<PayloadEvent, StreamError>;
}

/// Request body shared by both adapters
#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

fn build_streaming_request(
    url: String,
    history: &ChatHistory,
    provider: &ProviderConfig,
    params: &GenerationParams,
) -> Result<StreamRequest, AdapterError> {
    if history.is_empty() {
        return Err(AdapterError::InvalidRequest("history has no messages".into()));
    }
    if provider.model.trim().is_empty() {
        return Err(AdapterError::InvalidRequest("model is not set".into()));
    }

    let body = CompletionBody {
        model: &provider.model,
        messages: &history.messages,
        stream: true,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        top_p: params.top_p,
        stop: &params.stop,
    };

    let mut request = StreamRequest::post(url)
        .with_header("accept", "text/event-stream")
        .with_json(&body)?;
    if let Some(key) = &provider.api_key {
        request = request.with_header("authorization", format!("Bearer {key}"));
    }
    for (name, value) in &provider.extra_headers {
        request = request.with_header(name.clone(), value.clone());
    }
    Ok(request)
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

/// Streaming chat completions in the OpenAI wire format
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiCompatAdapter;

#[derive(Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn build_request(
        &self,
        history: &ChatHistory,
        provider: &ProviderConfig,
        params: &GenerationParams,
    ) -> Result<StreamRequest, AdapterError> {
        let url = format!(
            "{}/chat/completions",
            provider.base_url.trim_end_matches('/')
        );
        build_streaming_request(url, history, provider, params)
    }

    fn decode_payload(&self, payload: &str) -> Result<PayloadEvent, StreamError> {
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return Ok(PayloadEvent::Done);
        }
        // SSE fields other than `data:` arrive unchanged; they carry no text
        if !payload.starts_with('{') {
            return Ok(PayloadEvent::Skip);
        }

        let envelope: ChunkEnvelope = serde_json::from_str(payload).map_err(|e| {
            StreamError::new(
                StreamErrorKind::Unknown,
                format!("malformed stream chunk: {e}"),
                Some(Arc::new(e)),
            )
        })?;

        if let Some(error) = envelope.error {
            let kind = match error.kind.as_deref() {
                Some("invalid_request_error") => StreamErrorKind::Request,
                _ => StreamErrorKind::Server,
            };
            return Err(StreamError::new(kind, error.message, None));
        }

        let text = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty());

        Ok(text.map_or(PayloadEvent::Skip, PayloadEvent::Text))
    }
}

// ============================================================================
// Plain text
// ============================================================================

/// Endpoint whose payloads are the response text itself
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextAdapter;

impl ProviderAdapter for PlainTextAdapter {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn build_request(
        &self,
        history: &ChatHistory,
        provider: &ProviderConfig,
        params: &GenerationParams,
    ) -> Result<StreamRequest, AdapterError> {
        build_streaming_request(provider.base_url.clone(), history, provider, params)
    }

    fn decode_payload(&self, payload: &str) -> Result<PayloadEvent, StreamError> {
        if payload.is_empty() {
            Ok(PayloadEvent::Skip)
        } else {
            Ok(PayloadEvent::Text(payload.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn history() -> ChatHistory {
        ChatHistory::new("s1")
            .with_message(ChatMessage::system("be brief"))
            .with_message(ChatMessage::user("hello"))
    }

    fn body_json(request: &StreamRequest) -> serde_json::Value {
        serde_json::from_slice(request.body.as_deref().unwrap()).unwrap()
    }

    // ========================================================================
    // Request building
    // ========================================================================

    #[test]
    fn test_openai_request() {
        let provider = ProviderConfig::new("http://localhost:8080/v1/", "m1")
            .with_api_key("sk-test")
            .with_header("x-org", "acme");
        let params = GenerationParams::default()
            .with_temperature(0.5)
            .with_max_tokens(64);

        let request = OpenAiCompatAdapter
            .build_request(&history(), &provider, &params)
            .unwrap();

        assert_eq!(request.url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
        assert_eq!(request.header("accept"), Some("text/event-stream"));
        assert_eq!(request.header("x-org"), Some("acme"));
        assert_eq!(
            body_json(&request),
            serde_json::json!({
                "model": "m1",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ],
                "stream": true,
                "temperature": 0.5,
                "max_tokens": 64
            })
        );
    }

    #[test]
    fn test_request_without_key_has_no_auth_header() {
        let request = OpenAiCompatAdapter
            .build_request(&history(), &ProviderConfig::default(), &GenerationParams::default())
            .unwrap();
        assert_eq!(request.header("authorization"), None);
        let body = body_json(&request);
        assert!(body.get("temperature").is_none());
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_empty_history_is_rejected() {
        let err = OpenAiCompatAdapter
            .build_request(
                &ChatHistory::new("s1"),
                &ProviderConfig::default(),
                &GenerationParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidRequest(_)));
    }

    #[test]
    fn test_plain_text_posts_to_base_url() {
        let provider = ProviderConfig::new("http://localhost:9000/stream", "m");
        let request = PlainTextAdapter
            .build_request(&history(), &provider, &GenerationParams::default())
            .unwrap();
        assert_eq!(request.url, "http://localhost:9000/stream");
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = ProviderConfig::default().with_api_key("sk-secret");
        let shown = format!("{provider:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("redacted"));
    }

    // ========================================================================
    // Payload decoding
    // ========================================================================

    #[test]
    fn test_openai_decodes_delta() {
        let payload = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            OpenAiCompatAdapter.decode_payload(payload).unwrap(),
            PayloadEvent::Text("Hel".into())
        );
    }

    #[test]
    fn test_openai_skips_empty_and_role_deltas() {
        let adapter = OpenAiCompatAdapter;
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        let finished = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let empty = r#"{"choices":[{"delta":{"content":""}}]}"#;
        let others = [r#"{"choices":[]}"#, "event: ping", "", "   "];
        for payload in [role_only, finished, empty].into_iter().chain(others) {
            assert_eq!(adapter.decode_payload(payload).unwrap(), PayloadEvent::Skip);
        }
    }

    #[test]
    fn test_openai_done_sentinel() {
        assert_eq!(
            OpenAiCompatAdapter.decode_payload("[DONE]").unwrap(),
            PayloadEvent::Done
        );
    }

    #[test]
    fn test_openai_error_objects() {
        let adapter = OpenAiCompatAdapter;
        let server = r#"{"error":{"message":"overloaded","type":"server_error"}}"#;
        let err = adapter.decode_payload(server).unwrap_err();
        assert_eq!(err.kind(), StreamErrorKind::Server);
        assert_eq!(err.message(), "overloaded");

        let request = r#"{"error":{"message":"bad model","type":"invalid_request_error"}}"#;
        let err = adapter.decode_payload(request).unwrap_err();
        assert_eq!(err.kind(), StreamErrorKind::Request);
    }

    #[test]
    fn test_openai_malformed_chunk() {
        let err = OpenAiCompatAdapter.decode_payload("{not json").unwrap_err();
        assert_eq!(err.kind(), StreamErrorKind::Unknown);
        assert!(err.message().starts_with("malformed stream chunk"));
    }

    #[test]
    fn test_plain_text_decoding() {
        assert_eq!(
            PlainTextAdapter.decode_payload("hi there").unwrap(),
            PayloadEvent::Text("hi there".into())
        );
        assert_eq!(PlainTextAdapter.decode_payload("").unwrap(), PayloadEvent::Skip);
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("Plain".parse::<ProviderKind>().unwrap(), ProviderKind::PlainText);
        assert!("grpc".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::OpenAi.adapter().name(), "openai");
        assert_eq!(ProviderKind::PlainText.to_string(), "plain_text");
    }
}
