//! Workers on either side of the generation hand-off.
//!
//! `GenerationWorker` stands in for the generation service: it consumes
//! `GenerationRequested` and reports back as `JobEvent`s. `JobEventWorker`
//! applies those events to the registry.

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use genflow_core::JobId;
use genflow_events::{MessageBus, MessageEnvelope};

use super::OrchestratorError;
use super::messages::{GENERATION_REQUESTED_KIND, GenerationRequested, JOB_EVENT_KIND, JobEvent};
use crate::jobs::{JobRegistry, JobRegistryError, Transition};
use crate::workers::{self, SubscriptionWorker, WorkerHandle};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct GeneratorError(pub String);

/// Produces the artefact for one generation request.
///
/// Returns the key under which the result was stored.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequested, progress: &ProgressReporter<'_>) -> Result<String, GeneratorError>;
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn generate(&self, request: &GenerationRequested, progress: &ProgressReporter<'_>) -> Result<String, GeneratorError> {
        (**self).generate(request, progress)
    }
}

/// Lets a [`Generator`] publish progress for the job it is working on.
pub struct ProgressReporter<'a> {
    job_id: &'a JobId,
    emit: &'a dyn Fn(JobEvent),
}

impl<'a> ProgressReporter<'a> {
    pub fn new(job_id: &'a JobId, emit: &'a dyn Fn(JobEvent)) -> Self {
        Self { job_id, emit }
    }

    pub fn job_id(&self) -> &JobId {
        self.job_id
    }

    /// Best effort: a lost progress report is superseded by the next one.
    pub fn report(&self, progress: u8) {
        (self.emit)(JobEvent::Progress {
            job_id: self.job_id.clone(),
            progress: progress.min(100),
        });
    }
}

fn publish_event<B>(bus: &B, topic: &str, event: &JobEvent) -> Result<(), OrchestratorError>
where
    B: MessageBus<MessageEnvelope<JsonValue>>,
{
    let payload = serde_json::to_value(event).map_err(|e| OrchestratorError::Encode(e.to_string()))?;
    bus.publish(topic, MessageEnvelope::new(JOB_EVENT_KIND, payload))
        .map_err(|e| OrchestratorError::Publish(e.to_string()))
}

#[derive(Debug)]
pub struct GenerationWorker;

impl GenerationWorker {
    /// Consume `generation_topic` and run `generator` for each request, one at
    /// a time, publishing the outcome on `events_topic`.
    pub fn spawn<B, G>(
        bus: B,
        generation_topic: &str,
        events_topic: impl Into<String>,
        generator: G,
    ) -> io::Result<WorkerHandle>
    where
        B: MessageBus<MessageEnvelope<JsonValue>> + 'static,
        G: Generator + 'static,
    {
        let subscription = workers::subscribe(&bus, generation_topic)?;
        let events_topic = events_topic.into();

        SubscriptionWorker::spawn("generation-worker", subscription, move |envelope: MessageEnvelope<JsonValue>| {
            if envelope.kind() != GENERATION_REQUESTED_KIND {
                return Ok(());
            }
            let request: GenerationRequested = serde_json::from_value(envelope.into_payload())
                .map_err(|e| OrchestratorError::Decode(e.to_string()))?;

            let emit = |event: JobEvent| {
                if let Err(e) = publish_event(&bus, &events_topic, &event) {
                    warn!(job_id = %event.job_id(), error = %e, "failed to publish progress");
                }
            };
            let reporter = ProgressReporter::new(&request.job_id, &emit);

            let outcome = match generator.generate(&request, &reporter) {
                Ok(result_key) => JobEvent::Completed {
                    job_id: request.job_id.clone(),
                    result_key,
                },
                Err(e) => JobEvent::Failed {
                    job_id: request.job_id.clone(),
                    message: e.0,
                },
            };
            info!(job_id = %request.job_id, kind = %request.kind, "generation finished");
            publish_event(&bus, &events_topic, &outcome)
        })
    }
}

#[derive(Debug)]
pub struct JobEventWorker;

impl JobEventWorker {
    /// Apply job events from `topic` to `registry`.
    ///
    /// Redelivered or late events are harmless: the registry ignores stale
    /// progress and transitions out of terminal states.
    pub fn spawn<B>(bus: &B, topic: &str, registry: Arc<JobRegistry>) -> io::Result<WorkerHandle>
    where
        B: MessageBus<MessageEnvelope<JsonValue>>,
    {
        let subscription = workers::subscribe(bus, topic)?;

        SubscriptionWorker::spawn("job-event-worker", subscription, move |envelope: MessageEnvelope<JsonValue>| {
            if envelope.kind() != JOB_EVENT_KIND {
                return Ok(());
            }
            let event: JobEvent = serde_json::from_value(envelope.into_payload())
                .map_err(|e| OrchestratorError::Decode(e.to_string()))?;
            apply_event(&registry, event)
        })
    }
}

pub(crate) fn apply_event(registry: &JobRegistry, event: JobEvent) -> Result<(), OrchestratorError> {
    let outcome = match &event {
        JobEvent::Progress { job_id, progress } => registry.progress(job_id, *progress),
        JobEvent::Completed { job_id, result_key } => registry.success(job_id, result_key.as_str()),
        JobEvent::Failed { job_id, message } => registry.fail(job_id, message.as_str()),
    };

    match outcome {
        Ok(Transition::Applied) => Ok(()),
        Ok(Transition::Ignored) | Err(JobRegistryError::InvalidTransition { .. }) => {
            debug!(job_id = %event.job_id(), "job event had no effect");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use genflow_events::InMemoryMessageBus;

    use super::*;
    use crate::jobs::{JobStatus, TransitionPolicy};
    use crate::orchestrator::{GenerationKind, StoreInfo};

    type Bus = Arc<InMemoryMessageBus<MessageEnvelope<JsonValue>>>;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn apply_event_drives_the_registry() {
        let registry = JobRegistry::new();
        let id = JobId::from("j");
        registry.init(id.clone()).unwrap();
        registry.start(&id).unwrap();

        apply_event(&registry, JobEvent::Progress { job_id: id.clone(), progress: 40 }).unwrap();
        apply_event(&registry, JobEvent::Completed { job_id: id.clone(), result_key: "k".into() }).unwrap();
        // Redelivery after the terminal transition.
        apply_event(&registry, JobEvent::Failed { job_id: id.clone(), message: "late".into() }).unwrap();

        let view = registry.status(&id).unwrap();
        assert_eq!(view.status, JobStatus::Succeeded);
        assert_eq!(view.result_key.as_deref(), Some("k"));
    }

    #[test]
    fn apply_event_tolerates_redelivery_under_reject_policy() {
        let registry = JobRegistry::with_policy(TransitionPolicy::Reject);
        let id = JobId::from("j");
        registry.init(id.clone()).unwrap();
        registry.start(&id).unwrap();

        let done = JobEvent::Completed { job_id: id.clone(), result_key: "k".into() };
        apply_event(&registry, done.clone()).unwrap();
        apply_event(&registry, done).unwrap();
    }

    #[test]
    fn apply_event_reports_unknown_jobs() {
        let registry = JobRegistry::new();
        let err = apply_event(&registry, JobEvent::Progress { job_id: JobId::from("ghost"), progress: 1 }).unwrap_err();
        assert_eq!(err.kind(), genflow_core::ErrorKind::NotFound);
    }

    struct Scripted {
        seen: Mutex<Vec<JobId>>,
    }

    impl Generator for Scripted {
        fn generate(&self, request: &GenerationRequested, progress: &ProgressReporter<'_>) -> Result<String, GeneratorError> {
            self.seen.lock().unwrap().push(request.job_id.clone());
            progress.report(50);
            if request.prompt == "fail" {
                Err(GeneratorError("model unavailable".into()))
            } else {
                Ok(format!("results/{}", request.job_id))
            }
        }
    }

    fn requested(id: &str, prompt: &str) -> MessageEnvelope<JsonValue> {
        let payload = GenerationRequested {
            job_id: JobId::from(id),
            kind: GenerationKind::Scenario,
            prompt: prompt.into(),
            store: StoreInfo {
                store_id: "s".into(),
                name: "Store".into(),
                description: None,
                tags: vec![],
            },
        };
        MessageEnvelope::new(GENERATION_REQUESTED_KIND, serde_json::to_value(payload).unwrap())
    }

    #[test]
    fn generation_and_event_workers_complete_jobs() {
        let bus: Bus = Arc::new(InMemoryMessageBus::new());
        let registry = JobRegistry::arc();
        for id in ["ok", "bad"] {
            registry.init(JobId::from(id)).unwrap();
            registry.start(&JobId::from(id)).unwrap();
        }

        let events = JobEventWorker::spawn(&bus, "events", registry.clone()).unwrap();
        let generator = Arc::new(Scripted { seen: Mutex::new(vec![]) });
        let worker = GenerationWorker::spawn(bus.clone(), "generate", "events", generator.clone()).unwrap();

        bus.publish("generate", requested("ok", "spring")).unwrap();
        bus.publish("generate", requested("bad", "fail")).unwrap();

        wait_until(|| registry.list().iter().all(|v| v.status.is_terminal()));

        let ok = registry.status(&JobId::from("ok")).unwrap();
        assert_eq!(ok.status, JobStatus::Succeeded);
        assert_eq!(ok.result_key.as_deref(), Some("results/ok"));

        let bad = registry.status(&JobId::from("bad")).unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("model unavailable"));
        assert_eq!(generator.seen.lock().unwrap().len(), 2);

        worker.shutdown();
        events.shutdown();
    }
}
