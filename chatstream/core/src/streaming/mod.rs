//! Response Streaming
//!
//! Turns the payload stream of one turn into UI-stable text emissions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   payloads   ┌────────────────┐   text   ┌────────────────────┐
//! │  Transport   │ ───────────> │ ProviderAdapter │ ──────> │ FragmentAggregator │ ──> deltas
//! └──────────────┘              └────────────────┘          └────────────────────┘
//! ```
//!
//! Errors pass through unchanged and in order; the aggregator flushes any
//! buffered text ahead of them.

mod aggregator;

pub use aggregator::{AggregateExt, FragmentAggregator, DEFAULT_FLUSH_THRESHOLD};
