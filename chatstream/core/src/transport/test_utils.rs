//! Scripted in-process client for transport and orchestrator tests

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::client::{StreamRequest, StreamResponse, StreamingClient};
use super::registry::TaskId;
use crate::error::BoxError;

/// Sender feeding a channel-backed response body
pub type BodySender = mpsc::UnboundedSender<Result<Bytes, BoxError>>;

enum Script {
    Respond {
        status: u16,
        chunks: Vec<Result<Bytes, BoxError>>,
    },
    Channel {
        status: u16,
        receiver: mpsc::UnboundedReceiver<Result<Bytes, BoxError>>,
    },
    Fail(BoxError),
    Pending,
}

/// Replays queued responses, one per `send`, in push order
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `status` and a body made of `chunks`
    pub fn push_chunks(&self, status: u16, chunks: &[&str]) {
        let chunks = chunks
            .iter()
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .collect();
        self.scripts
            .lock()
            .push_back(Script::Respond { status, chunks });
    }

    /// Respond with `status` and a body fed through the returned sender
    ///
    /// The body stays open until the sender is dropped.
    pub fn push_channel(&self, status: u16) -> BodySender {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .push_back(Script::Channel { status, receiver });
        sender
    }

    /// Fail the request before any response arrives
    pub fn push_failure(&self, failure: impl Into<BoxError>) {
        self.scripts.lock().push_back(Script::Fail(failure.into()));
    }

    /// Never respond
    pub fn push_pending(&self) {
        self.scripts.lock().push_back(Script::Pending);
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl StreamingClient for ScriptedClient {
    async fn send(&self, request: &StreamRequest) -> Result<StreamResponse, BoxError> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front();
        match script {
            Some(Script::Respond { status, chunks }) => Ok(StreamResponse {
                status,
                body: futures::stream::iter(chunks).boxed(),
            }),
            Some(Script::Channel { status, receiver }) => Ok(StreamResponse {
                status,
                body: UnboundedReceiverStream::new(receiver).boxed(),
            }),
            Some(Script::Fail(failure)) => Err(failure),
            Some(Script::Pending) => futures::future::pending().await,
            None => Err("no scripted response left".into()),
        }
    }
}

/// Task id from a literal
pub fn tid(id: &str) -> TaskId {
    TaskId::new(id).unwrap()
}
