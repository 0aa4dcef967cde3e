use thiserror::Error;

use genflow_core::{CorrelationId, ErrorKind};

use crate::rendezvous::StoreError;

#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The bus rejected the request; nothing was awaited.
    #[error("publish failed: {0}")]
    Publish(String),

    /// No response within the deadline.
    #[error("no response for {correlation_id} within {timeout_ms}ms")]
    Timeout {
        correlation_id: CorrelationId,
        timeout_ms: u64,
    },

    /// A response arrived but is not the expected shape.
    #[error("undecodable response for {correlation_id}: {message}")]
    Decode {
        correlation_id: CorrelationId,
        message: String,
    },

    /// The responder answered with an error.
    #[error("responder failed for {correlation_id}: {message}")]
    Remote {
        correlation_id: CorrelationId,
        message: String,
    },

    /// The request payload could not be serialized.
    #[error("request encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Publish(_) => ErrorKind::Publish,
            BridgeError::Timeout { .. } => ErrorKind::Timeout,
            BridgeError::Decode { .. } => ErrorKind::Decode,
            BridgeError::Encode(_) => ErrorKind::Encode,
            BridgeError::Remote { .. } => ErrorKind::Remote,
            BridgeError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}
