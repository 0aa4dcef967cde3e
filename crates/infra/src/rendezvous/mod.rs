//! Keyed rendezvous store: the meeting point between a waiting caller and an
//! asynchronous responder.
//!
//! ## Contract
//!
//! - Keys carry a TTL; expired keys read as absent.
//! - `set_if_absent_or_waiting` is an atomic check-and-set per key: it writes
//!   only when the key is absent or still holds the WAITING sentinel. Two
//!   near-simultaneous resolvers can never both observe "I was first".
//! - `resolve_waiting` writes only over a live WAITING slot. It never
//!   recreates a key that expired or was deleted.
//! - The store has no knowledge of correlation semantics.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use in_memory::InMemoryRendezvousStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisRendezvousStore;
pub use store::{RendezvousStore, Slot, StoreError};
