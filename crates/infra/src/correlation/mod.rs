//! Correlation bridge: request/response over a pub/sub bus.
//!
//! ```text
//! caller ── request() ──► store.set(key, WAITING) ──► bus.publish(request_topic)
//!                                                              │
//!                                                      responder service
//!                                                              │
//! listener ◄── bus(response_topic) ◄───────────────────────────┘
//!    └─► store.set_if_absent_or_waiting(key, Resolved)   (first write wins)
//! caller poll loop ◄── store.get(key) until not WAITING or timeout
//! ```
//!
//! The store is the rendezvous point, which keeps the pattern working when
//! the caller and the listener live in different processes (Redis).

mod bridge;
mod error;
mod listener;
mod responder;

pub use bridge::CorrelationBridge;
pub use error::BridgeError;
pub use listener::{ListenerStats, Resolution, ResponseListener, resolve_response};
pub use responder::{ERROR_KIND, Responder};

/// Message kind of bridge requests.
pub const REQUEST_KIND: &str = "correlation.request";

/// Message kind of responses published by [`Responder`].
pub const RESPONSE_KIND: &str = "correlation.response";

/// Store key for a correlation id.
pub(crate) fn correlation_key(prefix: &str, correlation_id: &genflow_core::CorrelationId) -> String {
    format!("{prefix}{correlation_id}")
}
