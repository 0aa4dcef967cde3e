use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Value held at a rendezvous key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Placeholder written before a request is published.
    Waiting,
    /// Serialized response payload.
    Resolved(String),
}

impl Slot {
    pub fn is_waiting(&self) -> bool {
        matches!(self, Slot::Waiting)
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("rendezvous store backend error: {0}")]
    Backend(String),
    #[error("rendezvous store lock poisoned")]
    Poisoned,
}

/// Shared, expiring key → slot store.
pub trait RendezvousStore: Send + Sync {
    /// Write `slot` with `ttl` if `key` is absent or currently `Waiting`.
    ///
    /// Returns `true` when the write happened. Must be atomic per key.
    fn set_if_absent_or_waiting(&self, key: &str, slot: Slot, ttl: Duration) -> Result<bool, StoreError>;

    /// Replace a live `Waiting` slot with `Resolved(value)` and `ttl`.
    ///
    /// Returns `false` without writing when `key` is absent, expired or
    /// already resolved. Must be atomic per key.
    fn resolve_waiting(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError>;

    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

impl<S> RendezvousStore for Arc<S>
where
    S: RendezvousStore + ?Sized,
{
    fn set_if_absent_or_waiting(&self, key: &str, slot: Slot, ttl: Duration) -> Result<bool, StoreError> {
        (**self).set_if_absent_or_waiting(key, slot, ttl)
    }

    fn resolve_waiting(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        (**self).resolve_waiting(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }
}
