//! Redis pub/sub-backed message bus (optional).
//!
//! Each topic maps to one Redis channel. Redis pub/sub is not durable:
//! messages published while a subscriber is disconnected are lost, which the
//! correlation bridge tolerates as a timeout.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use redis::Commands;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use genflow_events::{MessageBus, MessageEnvelope, Subscription};

/// How long `subscribe()` waits for Redis to confirm the SUBSCRIBE.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis connection error: {0}")]
    Connection(String),
    #[error("redis command error: {0}")]
    Command(String),
    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Redis pub/sub bus for JSON message envelopes.
#[derive(Debug, Clone)]
pub struct RedisPubSubBus {
    client: redis::Client,
    channel_prefix: String,
}

impl RedisPubSubBus {
    pub fn new(redis_url: impl AsRef<str>, channel_prefix: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            channel_prefix: channel_prefix.into(),
        })
    }

    fn channel(&self, topic: &str) -> String {
        format!("{}{}", self.channel_prefix, topic)
    }
}

impl MessageBus<MessageEnvelope<JsonValue>> for RedisPubSubBus {
    type Error = RedisBusError;

    fn publish(&self, topic: &str, message: MessageEnvelope<JsonValue>) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;

        let _: i64 = conn
            .publish(self.channel(topic), payload)
            .map_err(|e| RedisBusError::Command(e.to_string()))?;

        Ok(())
    }

    /// Returns once Redis has acknowledged the SUBSCRIBE; connection or
    /// subscribe failures are returned instead of leaving a dead receiver.
    fn subscribe(&self, topic: &str) -> Result<Subscription<MessageEnvelope<JsonValue>>, Self::Error> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;
        let channel = self.channel(topic);

        // Receives pub/sub messages and forwards them. Exits once the
        // subscription is dropped (send fails) or the connection breaks.
        thread::spawn(move || {
            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                let _ = ready_tx.send(Err(RedisBusError::Command(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "redis pub/sub connection lost");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let envelope: MessageEnvelope<JsonValue> = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "dropping undecodable message");
                        continue;
                    }
                };

                if tx.send(envelope).is_err() {
                    return;
                }
            }
        });

        await_subscribed(&ready_rx, SUBSCRIBE_TIMEOUT)?;
        Ok(Subscription::new(topic, rx))
    }
}

fn await_subscribed(ready: &mpsc::Receiver<Result<(), RedisBusError>>, timeout: Duration) -> Result<(), RedisBusError> {
    match ready.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => Err(RedisBusError::Connection(format!(
            "SUBSCRIBE not acknowledged within {}ms",
            timeout.as_millis()
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(RedisBusError::Connection(
            "subscriber thread exited before subscribing".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(20);

    #[test]
    fn subscribe_to_an_unreachable_server_is_an_error() {
        let bus = RedisPubSubBus::new("redis://127.0.0.1:1/", "t:").unwrap();

        let err = bus.subscribe("topic").unwrap_err();

        assert!(matches!(err, RedisBusError::Connection(_)), "got {err:?}");
    }

    #[test]
    fn acknowledged_subscribe_is_ready() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok(())).unwrap();

        assert!(await_subscribed(&rx, WAIT).is_ok());
    }

    #[test]
    fn refused_subscribe_is_reported() {
        let (tx, rx) = mpsc::channel();
        tx.send(Err(RedisBusError::Command("NOPERM".into()))).unwrap();

        assert!(matches!(await_subscribed(&rx, WAIT), Err(RedisBusError::Command(m)) if m == "NOPERM"));
    }

    #[test]
    fn missing_acknowledgement_is_reported() {
        let (tx, rx) = mpsc::channel::<Result<(), RedisBusError>>();
        assert!(matches!(await_subscribed(&rx, WAIT), Err(RedisBusError::Connection(_))));

        drop(tx);
        assert!(matches!(await_subscribed(&rx, WAIT), Err(RedisBusError::Connection(_))));
    }
}
