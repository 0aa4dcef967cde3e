//! Message publishing/subscription abstraction (mechanics only).
//!
//! The bus is a topic-addressed pub/sub mechanism. It makes minimal
//! assumptions about the transport:
//!
//! - **Transport-agnostic**: in-memory channels, Redis pub/sub, brokers.
//! - **At-least-once delivery**: a message may be delivered more than once;
//!   consumers must be idempotent.
//! - **No ordering guarantees** across publishers or topics.
//! - **No persistence**: the bus distributes, it does not store.
//!
//! Components that need exactly-once *effects* (the correlation bridge, the
//! job registry) get them from their own state, never from the bus.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to one topic.
///
/// Each subscription receives its own copy of every message published to the
/// topic after it was created (broadcast semantics).
///
/// ```ignore
/// let sub = bus.subscribe(topic::STORE_INFO_RESPONSE)?;
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(msg) => handle(msg),
///         Err(RecvTimeoutError::Timeout) => continue,     // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,   // bus closed
///     }
/// }
/// ```
///
/// Subscriptions are meant to be drained by a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    topic: String,
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(topic: impl Into<String>, receiver: Receiver<M>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Topic-addressed pub/sub bus.
///
/// `publish()` reports synchronous failures (bus unavailable, serialization)
/// to the caller; it says nothing about whether any subscriber received the
/// message.
///
/// `subscribe()` returns only once the subscription is live: a message
/// published after it returns is delivered to it. Failing to establish the
/// subscription is an error, never a silently dead receiver.
///
/// Implementations must be `Send + Sync`: many threads publish concurrently.
pub trait MessageBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error>;
}

impl<M, B> MessageBus<M> for Arc<B>
where
    B: MessageBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error> {
        (**self).subscribe(topic)
    }
}
