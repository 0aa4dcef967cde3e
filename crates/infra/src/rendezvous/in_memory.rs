use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::store::{RendezvousStore, Slot, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory rendezvous store for tests/dev.
///
/// Expiry is lazy: expired entries read as absent and are physically removed
/// on the next write to the same key or by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct InMemoryRendezvousStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryRendezvousStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|e| e.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RendezvousStore for InMemoryRendezvousStore {
    fn set_if_absent_or_waiting(&self, key: &str, slot: Slot, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        // Check and write under one write guard.
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;

        let writable = match entries.get(key) {
            Some(current) if current.is_live(now) => current.slot.is_waiting(),
            _ => true,
        };

        if writable {
            entries.insert(
                key.to_string(),
                Entry {
                    slot,
                    expires_at: now + ttl,
                },
            );
        }

        Ok(writable)
    }

    fn resolve_waiting(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;

        match entries.get_mut(key) {
            Some(current) if current.is_live(now) && current.slot.is_waiting() => {
                current.slot = Slot::Resolved(value);
                current.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.slot.clone()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}
