//! In-memory message bus for tests/dev.

use std::collections::HashMap;
use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{MessageBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish or subscribe failed due to internal lock poisoning.
    #[error("in-memory bus lock poisoned")]
    Poisoned,
}

/// In-memory topic pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out per topic
/// - Messages to topics without subscribers are dropped
#[derive(Debug)]
pub struct InMemoryMessageBus<M> {
    topics: Mutex<HashMap<String, Vec<mpsc::Sender<M>>>>,
}

impl<M> InMemoryMessageBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a topic (dead ones are pruned on publish).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .map(|t| t.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryMessageBus<M> {
    fn default() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl<M> MessageBus<M> for InMemoryMessageBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        let mut topics = self.topics.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        if let Some(subs) = topics.get_mut(topic) {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(message.clone()).is_ok());
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error> {
        let (tx, rx) = mpsc::channel();
        let mut topics = self.topics.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        topics.entry(topic.to_string()).or_default().push(tx);

        Ok(Subscription::new(topic, rx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn delivers_only_to_matching_topic() {
        let bus = InMemoryMessageBus::<u32>::new();
        let a = bus.subscribe("a").unwrap();
        let b = bus.subscribe("b").unwrap();

        bus.publish("a", 7).unwrap();

        assert_eq!(a.recv_timeout(Duration::from_millis(100)).unwrap(), 7);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = InMemoryMessageBus::<&'static str>::new();
        let first = bus.subscribe("t").unwrap();
        let second = bus.subscribe("t").unwrap();

        bus.publish("t", "hello").unwrap();

        assert_eq!(first.try_recv().unwrap(), "hello");
        assert_eq!(second.try_recv().unwrap(), "hello");
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryMessageBus::<u8>::new();
        let sub = bus.subscribe("t").unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        drop(sub);
        bus.publish("t", 1).unwrap();

        assert_eq!(bus.subscriber_count("t"), 0);
    }
}
