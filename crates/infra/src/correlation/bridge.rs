use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use genflow_core::CorrelationId;
use genflow_events::{MessageBus, MessageEnvelope};

use super::listener::{ListenerStats, ResponseListener, StoredReply};
use super::{BridgeError, REQUEST_KIND, correlation_key};
use crate::config::BridgeConfig;
use crate::rendezvous::{RendezvousStore, Slot};
use crate::workers;

/// Synchronous request/response on top of a pub/sub bus.
///
/// Each call parks a WAITING sentinel under a fresh correlation id, publishes
/// the request, then polls the store until the listener has written the
/// first response or the deadline passes. Many calls may be in flight at
/// once from different threads.
pub struct CorrelationBridge<B, S: ?Sized> {
    bus: B,
    store: Arc<S>,
    config: BridgeConfig,
    listener: ResponseListener,
}

impl<B, S> CorrelationBridge<B, S>
where
    B: MessageBus<MessageEnvelope<JsonValue>>,
    S: RendezvousStore + ?Sized + 'static,
{
    /// Subscribe to the response topic and start the listener.
    ///
    /// The bus confirms the subscription before this returns, so no response
    /// to a later `request()` can be missed by the listener. A bus that cannot
    /// subscribe fails construction.
    pub fn new(bus: B, store: Arc<S>, config: BridgeConfig) -> io::Result<Self> {
        let subscription = workers::subscribe(&bus, &config.response_topic)?;
        let listener = ResponseListener::spawn(
            "correlation",
            subscription,
            store.clone(),
            config.key_prefix.clone(),
            config.resolved_ttl,
            config.listener_concurrency,
        )?;

        Ok(Self {
            bus,
            store,
            config,
            listener,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn listener_stats(&self) -> ListenerStats {
        self.listener.stats()
    }

    /// Send `payload` and wait up to the configured timeout for the reply.
    pub fn request<Req, Resp>(&self, payload: &Req) -> Result<Resp, BridgeError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.request_with_timeout(payload, self.config.timeout)
    }

    /// Like [`request`](Self::request) with an explicit deadline.
    ///
    /// Never retries: on timeout the caller decides whether to try again.
    #[instrument(skip(self, payload), fields(topic = %self.config.request_topic, timeout_ms = timeout.as_millis() as u64), err)]
    pub fn request_with_timeout<Req, Resp>(&self, payload: &Req, timeout: Duration) -> Result<Resp, BridgeError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_value(payload).map_err(|e| BridgeError::Encode(e.to_string()))?;
        let correlation_id = CorrelationId::new();
        let key = correlation_key(&self.config.key_prefix, &correlation_id);

        // The sentinel must exist before the request is visible on the bus.
        let sentinel_ttl = timeout + self.config.sentinel_grace;
        if !self.store.set_if_absent_or_waiting(&key, Slot::Waiting, sentinel_ttl)? {
            return Err(BridgeError::Store(crate::rendezvous::StoreError::Backend(format!(
                "correlation key already resolved: {key}"
            ))));
        }

        let envelope = MessageEnvelope::correlated(correlation_id, REQUEST_KIND, body);
        if let Err(e) = self.bus.publish(&self.config.request_topic, envelope) {
            self.discard(&key);
            return Err(BridgeError::Publish(e.to_string()));
        }
        debug!(%correlation_id, "request published");

        let raw = self.await_reply(&key, correlation_id, timeout)?;
        decode_reply(correlation_id, &raw)
    }

    fn await_reply(&self, key: &str, correlation_id: CorrelationId, timeout: Duration) -> Result<String, BridgeError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Sampled before the read: a reply stored before the deadline is
            // returned however long the read itself takes.
            let expired = Instant::now() >= deadline;

            match self.store.get(key) {
                Ok(Some(Slot::Resolved(raw))) => {
                    self.discard(key);
                    return Ok(raw);
                }
                Ok(Some(Slot::Waiting)) => {}
                Ok(None) => {
                    warn!(%correlation_id, "correlation entry vanished before resolution");
                    return Err(timeout_error(correlation_id, timeout));
                }
                Err(e) => {
                    self.discard(key);
                    return Err(e.into());
                }
            }

            if expired {
                self.discard(key);
                return Err(timeout_error(correlation_id, timeout));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(self.config.poll_interval.min(remaining));
        }
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key) {
            warn!(key, error = %e, "failed to delete correlation entry");
        }
    }
}

fn timeout_error(correlation_id: CorrelationId, timeout: Duration) -> BridgeError {
    BridgeError::Timeout {
        correlation_id,
        timeout_ms: timeout.as_millis() as u64,
    }
}

fn decode_reply<Resp: DeserializeOwned>(correlation_id: CorrelationId, raw: &str) -> Result<Resp, BridgeError> {
    let decode = |message: String| BridgeError::Decode {
        correlation_id,
        message,
    };

    match serde_json::from_str::<StoredReply>(raw).map_err(|e| decode(e.to_string()))? {
        StoredReply::Ok(value) => serde_json::from_value(value).map_err(|e| decode(e.to_string())),
        StoredReply::Error(message) => Err(BridgeError::Remote {
            correlation_id,
            message,
        }),
    }
}

impl<B, S: ?Sized> core::fmt::Debug for CorrelationBridge<B, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CorrelationBridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
