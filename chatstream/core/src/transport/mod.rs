//! Streaming Transport Layer
//!
//! Carries one server-push HTTP response per conversational turn:
//! - `client`: the [`StreamingClient`] seam and its `reqwest` implementation
//! - `frame`: line framing and payload extraction
//! - `registry`: task identifiers and their cancellation tokens
//! - `stream`: [`StreamingTransport`], tying the three together
//!
//! # Design Philosophy
//!
//! The transport owns its registry; there is no process-wide state. Two
//! transports never see each other's tasks.

pub mod client;
pub mod frame;
pub mod registry;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenience
pub use client::{
    ByteStream, ClientSettings, Method, ReqwestClient, StreamRequest, StreamResponse,
    StreamingClient,
};
pub use frame::{parse_line, FrameError, LineDecoder};
pub use registry::{InvalidTaskId, Registration, StreamTask, TaskId, TaskRegistry};
pub use stream::{PayloadStream, Reservation, StreamingTransport, TransportStats};
