//! Message bus mechanics: topics, envelopes, subscriptions.
//!
//! This crate knows nothing about correlation or jobs; it only moves messages.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod topic;

pub use bus::{MessageBus, Subscription};
pub use envelope::MessageEnvelope;
pub use in_memory_bus::{InMemoryBusError, InMemoryMessageBus};
