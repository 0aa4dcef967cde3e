use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use genflow_core::{CorrelationId, MessageId};

/// Envelope for a bus message.
///
/// Notes:
/// - `correlation_id` is the only wire contract the correlation bridge relies
///   on: requests carry it, responders echo it back unchanged.
/// - `kind` is a stable message type name (e.g. `"store_info.request"`).
/// - `payload` is domain-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope<P> {
    message_id: MessageId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,

    kind: String,
    occurred_at: DateTime<Utc>,

    payload: P,
}

impl<P> MessageEnvelope<P> {
    pub fn new(kind: impl Into<String>, payload: P) -> Self {
        Self {
            message_id: MessageId::new(),
            correlation_id: None,
            kind: kind.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Build a message tied to an outstanding request.
    pub fn correlated(correlation_id: CorrelationId, kind: impl Into<String>, payload: P) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::new(kind, payload)
        }
    }

    /// Build a reply that echoes this message's correlation id.
    pub fn reply<R>(&self, kind: impl Into<String>, payload: R) -> MessageEnvelope<R> {
        MessageEnvelope {
            correlation_id: self.correlation_id,
            ..MessageEnvelope::new(kind, payload)
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
