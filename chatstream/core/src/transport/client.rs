//! HTTP client seam
//!
//! The transport never talks to the network directly. It hands a
//! [`StreamRequest`] to a [`StreamingClient`] and reads the body of the
//! returned [`StreamResponse`] chunk by chunk. Dropping the body stream
//! must abort the underlying connection.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;

use crate::error::BoxError;

pub use reqwest::Method;

/// Body chunks of a streaming response
pub type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default user agent
pub const DEFAULT_USER_AGENT: &str = concat!("chatstream/", env!("CARGO_PKG_VERSION"));

/// One outgoing streaming request
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Header name/value pairs, sent in order
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<Bytes>,
}

impl StreamRequest {
    /// Create a request with the given method
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Create a POST request
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and the matching content type
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    /// First header value with the given name, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body of a streaming response
pub struct StreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Body chunks
    pub body: ByteStream,
}

impl StreamResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Issues streaming HTTP requests
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Send the request and return once the status line has arrived
    ///
    /// # Errors
    ///
    /// Returns the raw failure when no response was received at all; the
    /// transport classifies it.
    async fn send(&self, request: &StreamRequest) -> Result<StreamResponse, BoxError>;
}

/// Timeouts and identity for [`ReqwestClient`]
#[derive(Clone, Debug)]
pub struct ClientSettings {
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
    /// Maximum gap between body chunks; `None` waits forever
    pub read_timeout: Option<Duration>,
    /// User agent header
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// [`StreamingClient`] backed by `reqwest`
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    http: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client with default settings
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_settings(&ClientSettings::default())
    }

    /// Create a client with explicit settings
    ///
    /// No overall request timeout is set; a streamed answer may legitimately
    /// take minutes.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn with_settings(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone());
        if let Some(read_timeout) = settings.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }

    /// Wrap an already configured `reqwest` client
    #[must_use]
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StreamingClient for ReqwestClient {
    async fn send(&self, request: &StreamRequest) -> Result<StreamResponse, BoxError> {
        let mut builder = self.http.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_err(|e| Box::new(e) as BoxError)
            .boxed();

        Ok(StreamResponse { status, body })
    }
}
