use std::io;
use std::sync::Arc;
use std::thread;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use genflow_core::{ErrorKind, JobId};
use genflow_events::{MessageBus, MessageEnvelope};

use super::OrchestratorError;
use super::messages::{GENERATION_REQUESTED_KIND, GenerationRequest, GenerationRequested, StoreInfo, StoreInfoRequest};
use super::stage::JobEventWorker;
use crate::config::OrchestratorConfig;
use crate::correlation::CorrelationBridge;
use crate::jobs::{JobRegistry, JobRegistryError, JobStatusView, ProgressEmitter, Transition, Watchdog};
use crate::rendezvous::RendezvousStore;
use crate::workers::WorkerHandle;

/// Drives generation jobs from submission to hand-off.
///
/// `submit` only registers the job; the rest of the pipeline runs on a
/// dedicated thread per job so callers never wait on the bridge.
pub struct GenerationOrchestrator<B, S: ?Sized> {
    registry: Arc<JobRegistry>,
    bridge: Arc<CorrelationBridge<B, S>>,
    bus: B,
    config: OrchestratorConfig,
}

impl<B, S> GenerationOrchestrator<B, S>
where
    B: MessageBus<MessageEnvelope<JsonValue>> + Clone + 'static,
    S: RendezvousStore + ?Sized + 'static,
{
    pub fn new(
        registry: Arc<JobRegistry>,
        bridge: Arc<CorrelationBridge<B, S>>,
        bus: B,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            bridge,
            bus,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<CorrelationBridge<B, S>> {
        &self.bridge
    }

    /// Start applying job events from the configured topic to the registry.
    pub fn spawn_event_worker(&self) -> io::Result<WorkerHandle> {
        JobEventWorker::spawn(&self.bus, &self.config.job_events_topic, self.registry.clone())
    }

    /// Register a job and start its pipeline. Returns as soon as the job is queued.
    pub fn submit(&self, request: GenerationRequest) -> Result<JobId, OrchestratorError> {
        let job_id = request.job_id.clone().unwrap_or_else(JobId::generate);
        self.registry.init(job_id.clone())?;

        let pipeline = Pipeline {
            registry: self.registry.clone(),
            bridge: self.bridge.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            job_id: job_id.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("pipeline-{job_id}"))
            .spawn(move || pipeline.run(request));

        if let Err(e) = spawned {
            let err = OrchestratorError::from(e);
            fail_job(&self.registry, &job_id, err.kind(), &err);
            return Err(err);
        }

        info!(job_id = %job_id, "generation submitted");
        Ok(job_id)
    }

    /// Fail the job with `"cancelled"` if it is still active and release its
    /// observers either way.
    pub fn cancel(&self, job_id: &JobId) -> Result<JobStatusView, OrchestratorError> {
        match self.registry.fail(job_id, "cancelled") {
            Ok(Transition::Applied) => info!(job_id = %job_id, "job cancelled"),
            Ok(Transition::Ignored) | Err(JobRegistryError::InvalidTransition { .. }) => {
                debug!(job_id = %job_id, "cancel on finished job")
            }
            Err(e) => return Err(e.into()),
        }

        self.registry.complete(job_id)?;
        Ok(self.registry.status(job_id)?)
    }

    pub fn status(&self, job_id: &JobId) -> Result<JobStatusView, OrchestratorError> {
        Ok(self.registry.status(job_id)?)
    }
}

impl<B, S: ?Sized> core::fmt::Debug for GenerationOrchestrator<B, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Pipeline<B, S: ?Sized> {
    registry: Arc<JobRegistry>,
    bridge: Arc<CorrelationBridge<B, S>>,
    bus: B,
    config: OrchestratorConfig,
    job_id: JobId,
}

impl<B, S> Pipeline<B, S>
where
    B: MessageBus<MessageEnvelope<JsonValue>> + Clone + 'static,
    S: RendezvousStore + ?Sized + 'static,
{
    fn run(self, request: GenerationRequest) {
        let job_id = &self.job_id;

        match self.registry.start(job_id) {
            Ok(Transition::Applied) => {}
            Ok(Transition::Ignored) => {
                debug!(job_id = %job_id, "job no longer queued; pipeline skipped");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "could not start job");
                return;
            }
        }

        if let Err(e) = self.attach_observers() {
            fail_job(&self.registry, job_id, e.kind(), &e);
            return;
        }

        let store_request = StoreInfoRequest {
            store_id: request.store_id.clone(),
        };
        let store: StoreInfo = match self.bridge.request(&store_request) {
            Ok(info) => info,
            Err(e) => {
                fail_job(&self.registry, job_id, e.kind(), &e);
                return;
            }
        };

        // Cancelled or timed out while the bridge was waiting.
        if self.registry.status(job_id).map_or(true, |v| v.status.is_terminal()) {
            debug!(job_id = %job_id, "job finished before hand-off");
            return;
        }

        let requested = GenerationRequested {
            job_id: job_id.clone(),
            kind: request.kind,
            prompt: request.prompt,
            store,
        };
        if let Err(e) = self.hand_off(&requested) {
            fail_job(&self.registry, job_id, e.kind(), &e);
            return;
        }

        info!(job_id = %job_id, kind = %requested.kind, "generation requested");
    }

    fn attach_observers(&self) -> Result<(), OrchestratorError> {
        let job_id = &self.job_id;
        let progress = ProgressEmitter::spawn(
            job_id.clone(),
            self.registry.clone(),
            self.bus.clone(),
            self.config.status_topic.clone(),
            self.config.progress_interval,
        )?;
        let watchdog = match Watchdog::spawn(job_id.clone(), self.registry.clone(), self.config.job_deadline) {
            Ok(handle) => handle,
            Err(e) => {
                progress.dispose();
                return Err(e.into());
            }
        };

        let Some(job) = self.registry.find(job_id) else {
            progress.dispose();
            watchdog.dispose();
            return Ok(());
        };

        // A job that finished in the meantime refuses the attach and the
        // registry disposes both handles.
        match self.registry.put(job.with_progress_subscription(progress).with_watch_subscription(watchdog)) {
            Ok(_) | Err(JobRegistryError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn hand_off(&self, requested: &GenerationRequested) -> Result<(), OrchestratorError> {
        let payload = serde_json::to_value(requested).map_err(|e| OrchestratorError::Encode(e.to_string()))?;
        self.bus
            .publish(
                &self.config.generation_topic,
                MessageEnvelope::new(GENERATION_REQUESTED_KIND, payload),
            )
            .map_err(|e| OrchestratorError::Publish(e.to_string()))
    }
}

/// Record `"<code>: <message>"` on the job, where `<code>` is the kind's wire code.
fn fail_job(registry: &JobRegistry, job_id: &JobId, kind: ErrorKind, error: &dyn std::fmt::Display) {
    let code = kind.as_str();
    warn!(job_id = %job_id, error_kind = code, error = %error, "generation pipeline failed");
    if let Err(e) = registry.fail(job_id, format!("{code}: {error}")) {
        debug!(job_id = %job_id, error = %e, "failure not recorded");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use genflow_events::{InMemoryMessageBus, Subscription};

    use super::*;
    use crate::config::BridgeConfig;
    use crate::correlation::Responder;
    use crate::jobs::JobStatus;
    use crate::orchestrator::GenerationKind;
    use crate::rendezvous::InMemoryRendezvousStore;

    type Bus = Arc<InMemoryMessageBus<MessageEnvelope<JsonValue>>>;
    type Orchestrator = GenerationOrchestrator<Bus, InMemoryRendezvousStore>;

    fn orchestrator(bridge_timeout: Duration) -> (Bus, Orchestrator) {
        let bus: Bus = Arc::new(InMemoryMessageBus::new());
        let bridge_config = BridgeConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(bridge_timeout);
        let store = Arc::new(InMemoryRendezvousStore::new());
        let bridge = Arc::new(CorrelationBridge::new(bus.clone(), store, bridge_config).unwrap());
        let config = OrchestratorConfig::default().with_progress_interval(Duration::from_millis(20));
        let orch = GenerationOrchestrator::new(JobRegistry::arc(), bridge, bus.clone(), config);
        (bus, orch)
    }

    fn request(store_id: &str) -> GenerationRequest {
        GenerationRequest {
            job_id: None,
            store_id: store_id.into(),
            kind: GenerationKind::Scenario,
            prompt: "summer sale".into(),
        }
    }

    fn wait_for_status(orch: &Orchestrator, id: &JobId, pred: impl Fn(JobStatus) -> bool) -> JobStatusView {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let view = orch.status(id).unwrap();
            if pred(view.status) {
                return view;
            }
            assert!(Instant::now() < deadline, "job stuck in {:?}", view.status);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn submit_gathers_store_info_and_hands_off() {
        let (bus, orch) = orchestrator(Duration::from_secs(2));
        let cfg = orch.bridge().config().clone();
        let _responder = Responder::spawn("stores", bus.clone(), &cfg.request_topic, cfg.response_topic.clone(), |req| {
            Ok(serde_json::json!({ "store_id": req["store_id"], "name": "Corner Shop" }))
        })
        .unwrap();
        let generated: Subscription<MessageEnvelope<JsonValue>> = bus.subscribe(&OrchestratorConfig::default().generation_topic).unwrap();

        let id = orch.submit(request("s-1")).unwrap();

        let envelope = generated.recv_timeout(Duration::from_secs(3)).unwrap();
        let handed: GenerationRequested = serde_json::from_value(envelope.into_payload()).unwrap();
        assert_eq!(handed.job_id, id);
        assert_eq!(handed.store.name, "Corner Shop");

        let job = orch.registry().find(&id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.progress_subscription.is_some());
        assert!(job.watch_subscription.is_some());

        orch.cancel(&id).unwrap();
    }

    #[test]
    fn bridge_timeout_fails_the_job_with_its_kind() {
        let (_bus, orch) = orchestrator(Duration::from_millis(30));

        let id = orch.submit(request("nobody-answers")).unwrap();
        let view = wait_for_status(&orch, &id, |s| s.is_terminal());

        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error.unwrap().starts_with("timeout:"));
    }

    #[test]
    fn spawn_failure_is_recorded_with_the_internal_error_code() {
        let registry = JobRegistry::new();
        let id = JobId::from("no-thread");
        registry.init(id.clone()).unwrap();
        let err = OrchestratorError::Spawn("resource temporarily unavailable".into());

        fail_job(&registry, &id, err.kind(), &err);

        let view = registry.status(&id).unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(
            view.error.as_deref(),
            Some("internal_error: failed to spawn worker thread: resource temporarily unavailable")
        );
    }

    #[test]
    fn duplicate_job_id_is_rejected() {
        let (_bus, orch) = orchestrator(Duration::from_millis(30));
        let mut req = request("s");
        req.job_id = Some(JobId::from("fixed"));

        orch.submit(req.clone()).unwrap();
        let err = orch.submit(req).unwrap_err();

        assert_eq!(err.kind(), genflow_core::ErrorKind::AlreadyExists);
    }

    #[test]
    fn cancel_fails_active_job_and_releases_observers() {
        let (_bus, orch) = orchestrator(Duration::from_secs(2));

        let id = orch.submit(request("slow")).unwrap();
        wait_for_status(&orch, &id, |s| s == JobStatus::Running);

        let view = orch.cancel(&id).unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("cancelled"));

        let job = orch.registry().find(&id).unwrap();
        assert!(job.progress_subscription.is_none());
        assert!(job.watch_subscription.is_none());

        // A second cancel is a no-op.
        assert_eq!(orch.cancel(&id).unwrap().error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn cancel_unknown_job_is_not_found() {
        let (_bus, orch) = orchestrator(Duration::from_millis(30));
        let err = orch.cancel(&JobId::from("ghost")).unwrap_err();
        assert_eq!(err.kind(), genflow_core::ErrorKind::NotFound);
    }
}
