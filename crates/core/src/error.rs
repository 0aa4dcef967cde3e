//! Error classification shared across crates.

use serde::Serialize;
use thiserror::Error;

/// Stable, programmatic classification of a failure.
///
/// Every library error in the workspace maps onto one of these kinds so that
/// callers (HTTP layer, orchestrator) can branch on the kind rather than on a
/// message string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The bus rejected an outbound message.
    Publish,
    /// No response arrived before the deadline.
    Timeout,
    /// A response arrived but could not be interpreted.
    Decode,
    /// An outbound payload could not be serialized.
    Encode,
    /// The remote responder reported a failure.
    Remote,
    /// Unknown job id.
    NotFound,
    /// Job id already registered.
    AlreadyExists,
    /// State machine violation.
    InvalidTransition,
    /// Backing store (cache, lock) failure.
    Store,
    /// Local resource failure (thread spawn and the like).
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Publish => "publish_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Decode => "decode_error",
            ErrorKind::Encode => "encode_error",
            ErrorKind::Remote => "remote_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Store => "store_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identifier could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid identifier: {0}")]
pub struct InvalidId(pub String);
