//! `genflow-core`: shared building blocks.
//!
//! Identifiers and error classification used by every other crate. No
//! infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::{ErrorKind, InvalidId};
pub use id::{CorrelationId, JobId, MessageId};
