//! Responder side of the correlation pattern.

use std::io;

use serde_json::Value as JsonValue;
use tracing::debug;

use genflow_events::{MessageBus, MessageEnvelope};

use super::RESPONSE_KIND;
use crate::workers::{self, SubscriptionWorker, WorkerHandle};

/// Message kind of a responder failure; payload is `{"message": "..."}`.
pub const ERROR_KIND: &str = "correlation.error";

/// Answers correlated requests from a request topic onto a response topic.
///
/// The reply copies the request's correlation id, which is all the bridge
/// needs to route it back to the waiting caller.
#[derive(Debug)]
pub struct Responder;

impl Responder {
    pub fn spawn<B, H>(
        name: impl Into<String>,
        bus: B,
        request_topic: &str,
        response_topic: impl Into<String>,
        handler: H,
    ) -> io::Result<WorkerHandle>
    where
        B: MessageBus<MessageEnvelope<JsonValue>> + 'static,
        H: Fn(JsonValue) -> Result<JsonValue, String> + Send + 'static,
    {
        let subscription = workers::subscribe(&bus, request_topic)?;
        let response_topic = response_topic.into();

        SubscriptionWorker::spawn(name, subscription, move |request: MessageEnvelope<JsonValue>| {
            if request.correlation_id().is_none() {
                debug!(kind = request.kind(), "ignoring uncorrelated request");
                return Ok(());
            }

            let reply = match handler(request.payload().clone()) {
                Ok(value) => request.reply(RESPONSE_KIND, value),
                Err(message) => request.reply(ERROR_KIND, serde_json::json!({ "message": message })),
            };
            bus.publish(&response_topic, reply).map_err(|e| e.to_string())
        })
    }
}
