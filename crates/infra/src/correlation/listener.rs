//! Bridge-side response listener.
//!
//! One listener per bridge instance. A receiving thread drains the response
//! topic and hands each message to a small pool of resolver threads; every
//! message becomes one independent conditional write to the store, so a slow
//! write never holds up other responses.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use genflow_events::{MessageEnvelope, Subscription};

use super::correlation_key;
use super::responder::ERROR_KIND;
use crate::rendezvous::{RendezvousStore, Slot, StoreError};

/// What the listener did with one response message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// First response for a waiting request; stored.
    Resolved,
    /// The request was already resolved (bus redelivery or duplicate reply).
    Duplicate,
    /// No entry: the request timed out, was consumed, or never existed here.
    Late,
    /// The message carried no correlation id.
    Uncorrelated,
}

/// Reply as parked in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StoredReply {
    Ok(JsonValue),
    Error(String),
}

impl StoredReply {
    fn from_envelope(envelope: &MessageEnvelope<JsonValue>) -> Self {
        if envelope.kind() == ERROR_KIND {
            let message = envelope
                .payload()
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("responder failed")
                .to_string();
            StoredReply::Error(message)
        } else {
            StoredReply::Ok(envelope.payload().clone())
        }
    }
}

/// Apply one response message to the store.
///
/// The reply is written only over a live WAITING slot, in a single atomic
/// store call, so the first processed response wins and a key the requester
/// already abandoned is never recreated. The follow-up read only classifies
/// a refused write.
pub fn resolve_response<S>(
    store: &S,
    key_prefix: &str,
    resolved_ttl: Duration,
    envelope: &MessageEnvelope<JsonValue>,
) -> Result<Resolution, StoreError>
where
    S: RendezvousStore + ?Sized,
{
    let Some(correlation_id) = envelope.correlation_id() else {
        return Ok(Resolution::Uncorrelated);
    };
    let key = correlation_key(key_prefix, &correlation_id);

    let reply = StoredReply::from_envelope(envelope);
    let encoded = serde_json::to_string(&reply).map_err(|e| StoreError::Backend(e.to_string()))?;
    if store.resolve_waiting(&key, encoded, resolved_ttl)? {
        return Ok(Resolution::Resolved);
    }

    match store.get(&key)? {
        Some(Slot::Resolved(_)) => Ok(Resolution::Duplicate),
        _ => Ok(Resolution::Late),
    }
}

/// Listener runtime counters.
#[derive(Debug, Default)]
struct Counters {
    resolved: AtomicU64,
    duplicates: AtomicU64,
    late: AtomicU64,
    uncorrelated: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &Result<Resolution, StoreError>) {
        let counter = match outcome {
            Ok(Resolution::Resolved) => &self.resolved,
            Ok(Resolution::Duplicate) => &self.duplicates,
            Ok(Resolution::Late) => &self.late,
            Ok(Resolution::Uncorrelated) => &self.uncorrelated,
            Err(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of listener counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub resolved: u64,
    pub duplicates: u64,
    pub late: u64,
    pub uncorrelated: u64,
    pub errors: u64,
}

/// Handle to a running response listener.
#[derive(Debug)]
pub struct ResponseListener {
    shutdown: Option<mpsc::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ResponseListener {
    /// Start draining `subscription` into `store`.
    pub fn spawn<S>(
        name: &str,
        subscription: Subscription<MessageEnvelope<JsonValue>>,
        store: Arc<S>,
        key_prefix: String,
        resolved_ttl: Duration,
        concurrency: usize,
    ) -> io::Result<Self>
    where
        S: RendezvousStore + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (work_tx, work_rx) = mpsc::channel::<MessageEnvelope<JsonValue>>();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let counters = Arc::new(Counters::default());
        let key_prefix: Arc<str> = key_prefix.into();

        let mut workers = Vec::with_capacity(concurrency.max(1));
        for i in 0..concurrency.max(1) {
            let work_rx = work_rx.clone();
            let store = store.clone();
            let counters = counters.clone();
            let key_prefix = key_prefix.clone();
            let worker = thread::Builder::new()
                .name(format!("{name}-resolver-{i}"))
                .spawn(move || resolver_loop(&work_rx, store.as_ref(), &key_prefix, resolved_ttl, &counters))?;
            workers.push(worker);
        }

        let listener_name = name.to_string();
        let join = thread::Builder::new()
            .name(format!("{name}-listener"))
            .spawn(move || receive_loop(&listener_name, subscription, shutdown_rx, work_tx))?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            workers,
            counters,
        })
    }

    pub fn stats(&self) -> ListenerStats {
        let c = &self.counters;
        ListenerStats {
            resolved: c.resolved.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            late: c.late.load(Ordering::Relaxed),
            uncorrelated: c.uncorrelated.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }

    /// Request graceful shutdown and wait for all listener threads.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ResponseListener {
    fn drop(&mut self) {
        // Signal only; threads wind down on their own.
        self.stop();
    }
}

fn receive_loop(
    name: &str,
    subscription: Subscription<MessageEnvelope<JsonValue>>,
    shutdown_rx: mpsc::Receiver<()>,
    work_tx: mpsc::Sender<MessageEnvelope<JsonValue>>,
) {
    let tick = Duration::from_millis(250);
    info!(listener = name, topic = subscription.topic(), "response listener started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match subscription.recv_timeout(tick) {
            Ok(envelope) => {
                if work_tx.send(envelope).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Dropping `work_tx` lets the resolvers drain and exit.
    info!(listener = name, "response listener stopped");
}

fn resolver_loop<S>(
    work_rx: &Mutex<mpsc::Receiver<MessageEnvelope<JsonValue>>>,
    store: &S,
    key_prefix: &str,
    resolved_ttl: Duration,
    counters: &Counters,
) where
    S: RendezvousStore + ?Sized,
{
    loop {
        let next = match work_rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(envelope) = next else {
            return;
        };

        let outcome = resolve_response(store, key_prefix, resolved_ttl, &envelope);
        counters.record(&outcome);

        match outcome {
            Ok(Resolution::Resolved) => {
                debug!(correlation_id = ?envelope.correlation_id(), "response resolved")
            }
            Ok(other) => {
                debug!(correlation_id = ?envelope.correlation_id(), outcome = ?other, "response dropped")
            }
            Err(e) => {
                warn!(correlation_id = ?envelope.correlation_id(), error = %e, "failed to store response")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use genflow_core::CorrelationId;

    use super::*;
    use crate::rendezvous::InMemoryRendezvousStore;

    const TTL: Duration = Duration::from_secs(30);
    const PREFIX: &str = "t:";

    fn response(id: CorrelationId, value: JsonValue) -> MessageEnvelope<JsonValue> {
        MessageEnvelope::correlated(id, "test.response", value)
    }

    #[test]
    fn first_response_wins_and_duplicates_are_dropped() {
        let store = InMemoryRendezvousStore::new();
        let id = CorrelationId::new();
        let key = correlation_key(PREFIX, &id);
        store.set_if_absent_or_waiting(&key, Slot::Waiting, TTL).unwrap();

        let first = resolve_response(&store, PREFIX, TTL, &response(id, serde_json::json!(1))).unwrap();
        let second = resolve_response(&store, PREFIX, TTL, &response(id, serde_json::json!(2))).unwrap();

        assert_eq!(first, Resolution::Resolved);
        assert_eq!(second, Resolution::Duplicate);

        let Some(Slot::Resolved(raw)) = store.get(&key).unwrap() else {
            panic!("expected resolved slot");
        };
        let reply: StoredReply = serde_json::from_str(&raw).unwrap();
        assert_eq!(reply, StoredReply::Ok(serde_json::json!(1)));
    }

    #[test]
    fn response_without_waiting_entry_is_late() {
        let store = InMemoryRendezvousStore::new();
        let outcome = resolve_response(&store, PREFIX, TTL, &response(CorrelationId::new(), JsonValue::Null)).unwrap();

        assert_eq!(outcome, Resolution::Late);
        assert!(store.is_empty());
    }

    /// Abandons every key the listener touches, as a requester timing out
    /// concurrently would.
    struct AbandonedOnAccess(InMemoryRendezvousStore);

    impl RendezvousStore for AbandonedOnAccess {
        fn set_if_absent_or_waiting(&self, key: &str, slot: Slot, ttl: Duration) -> Result<bool, StoreError> {
            self.0.set_if_absent_or_waiting(key, slot, ttl)
        }

        fn resolve_waiting(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
            self.0.delete(key)?;
            self.0.resolve_waiting(key, value, ttl)
        }

        fn get(&self, key: &str) -> Result<Option<Slot>, StoreError> {
            let slot = self.0.get(key)?;
            self.0.delete(key)?;
            Ok(slot)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key)
        }
    }

    #[test]
    fn key_abandoned_before_the_write_is_not_recreated() {
        let store = AbandonedOnAccess(InMemoryRendezvousStore::new());
        let id = CorrelationId::new();
        let key = correlation_key(PREFIX, &id);
        store.set_if_absent_or_waiting(&key, Slot::Waiting, TTL).unwrap();

        let outcome = resolve_response(&store, PREFIX, TTL, &response(id, serde_json::json!(1))).unwrap();

        assert_eq!(outcome, Resolution::Late);
        assert_eq!(store.0.get(&key).unwrap(), None);
        assert!(store.0.is_empty());
    }

    #[test]
    fn uncorrelated_messages_are_ignored() {
        let store = InMemoryRendezvousStore::new();
        let outcome = resolve_response(&store, PREFIX, TTL, &MessageEnvelope::new("x", JsonValue::Null)).unwrap();

        assert_eq!(outcome, Resolution::Uncorrelated);
    }

    #[test]
    fn error_replies_are_stored_as_errors() {
        let store = InMemoryRendezvousStore::new();
        let id = CorrelationId::new();
        let key = correlation_key(PREFIX, &id);
        store.set_if_absent_or_waiting(&key, Slot::Waiting, TTL).unwrap();

        let env = MessageEnvelope::correlated(id, ERROR_KIND, serde_json::json!({"message": "unknown store"}));
        resolve_response(&store, PREFIX, TTL, &env).unwrap();

        let Some(Slot::Resolved(raw)) = store.get(&key).unwrap() else {
            panic!("expected resolved slot");
        };
        assert_eq!(
            serde_json::from_str::<StoredReply>(&raw).unwrap(),
            StoredReply::Error("unknown store".into())
        );
    }
}
