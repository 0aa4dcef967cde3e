use thiserror::Error;

use genflow_core::ErrorKind;

use crate::jobs::JobRegistryError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Registry(#[from] JobRegistryError),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    /// An inbound message could not be interpreted.
    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Registry(e) => e.kind(),
            OrchestratorError::Publish(_) => ErrorKind::Publish,
            OrchestratorError::Encode(_) => ErrorKind::Encode,
            OrchestratorError::Decode(_) => ErrorKind::Decode,
            OrchestratorError::Spawn(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Spawn(e.to_string())
    }
}
