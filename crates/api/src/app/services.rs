//! Service wiring: bus, rendezvous store, bridge, registry, orchestrator and
//! the background workers that keep jobs moving.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::info;

use genflow_core::JobId;
use genflow_events::{InMemoryMessageBus, MessageBus, MessageEnvelope};
use genflow_infra::config::{BridgeConfig, OrchestratorConfig, RegistryConfig};
use genflow_infra::correlation::{BridgeError, CorrelationBridge, Responder};
use genflow_infra::jobs::{JobRegistry, JobStatusView};
use genflow_infra::orchestrator::{
    GenerationOrchestrator, GenerationRequest, GenerationRequested, GenerationWorker, Generator, GeneratorError,
    OrchestratorError, ProgressReporter, StoreInfo, StoreInfoRequest,
};
use genflow_infra::rendezvous::{InMemoryRendezvousStore, RendezvousStore};
use genflow_infra::workers::WorkerHandle;

#[cfg(feature = "redis")]
use genflow_infra::{event_bus::RedisPubSubBus, rendezvous::RedisRendezvousStore};

type InMemoryBus = Arc<InMemoryMessageBus<MessageEnvelope<JsonValue>>>;

/// Everything needed to build the service graph.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub orchestrator: OrchestratorConfig,
    pub registry: RegistryConfig,
    /// Run the built-in store-info responder and generator in-process.
    pub demo_workers: bool,
    pub use_redis: bool,
    pub redis_url: String,
}

impl AppConfig {
    /// Read `GENFLOW_*` settings plus `USE_REDIS`, `REDIS_URL` and
    /// `GENFLOW_DEMO_WORKERS` (on by default for in-memory wiring).
    pub fn from_env() -> Self {
        let use_redis = env_flag("USE_REDIS").unwrap_or(false);
        Self {
            bridge: BridgeConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
            registry: RegistryConfig::from_env(),
            demo_workers: env_flag("GENFLOW_DEMO_WORKERS").unwrap_or(!use_redis),
            use_redis,
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        }
    }

    /// In-memory wiring with demo workers; what tests and local runs use.
    pub fn in_memory() -> Self {
        Self {
            demo_workers: true,
            ..Self::default()
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<bool>().ok())
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to start background worker: {0}")]
    Spawn(#[from] io::Error),

    #[cfg(feature = "redis")]
    #[error("redis setup failed: {0}")]
    Redis(String),
}

/// Orchestrator plus the workers it relies on, for one concrete bus/store pair.
pub struct ServiceStack<B, S> {
    orchestrator: GenerationOrchestrator<B, S>,
    workers: Vec<WorkerHandle>,
}

impl<B, S> ServiceStack<B, S>
where
    B: MessageBus<MessageEnvelope<JsonValue>> + Clone + 'static,
    S: RendezvousStore + 'static,
{
    fn build(bus: B, store: Arc<S>, config: &AppConfig) -> Result<Self, ServiceError> {
        let mut workers = Vec::new();

        // The responder must be listening before the first bridge request.
        if config.demo_workers {
            workers.push(Responder::spawn(
                "store-info-responder",
                bus.clone(),
                &config.bridge.request_topic,
                config.bridge.response_topic.clone(),
                demo_store_info,
            )?);
            workers.push(GenerationWorker::spawn(
                bus.clone(),
                &config.orchestrator.generation_topic,
                config.orchestrator.job_events_topic.clone(),
                TemplateGenerator::default(),
            )?);
        }

        let bridge = Arc::new(CorrelationBridge::new(bus.clone(), store, config.bridge.clone())?);
        let registry = Arc::new(JobRegistry::from_config(&config.registry));
        let orchestrator = GenerationOrchestrator::new(registry, bridge, bus, config.orchestrator.clone());
        workers.push(orchestrator.spawn_event_worker()?);

        info!(workers = workers.len(), demo = config.demo_workers, "services started");
        Ok(Self { orchestrator, workers })
    }

    fn submit(&self, request: GenerationRequest) -> Result<JobId, OrchestratorError> {
        self.orchestrator.submit(request)
    }

    fn status(&self, job_id: &JobId) -> Result<JobStatusView, OrchestratorError> {
        self.orchestrator.status(job_id)
    }

    fn list(&self) -> Vec<JobStatusView> {
        self.orchestrator.registry().list()
    }

    fn cancel(&self, job_id: &JobId) -> Result<JobStatusView, OrchestratorError> {
        self.orchestrator.cancel(job_id)
    }

    fn store_info(&self, store_id: &str) -> Result<StoreInfo, BridgeError> {
        self.orchestrator.bridge().request(&StoreInfoRequest {
            store_id: store_id.to_string(),
        })
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(WorkerHandle::name).collect()
    }
}

pub enum AppServices {
    InMemory(ServiceStack<InMemoryBus, InMemoryRendezvousStore>),
    #[cfg(feature = "redis")]
    Redis(ServiceStack<Arc<RedisPubSubBus>, RedisRendezvousStore>),
}

pub fn build_services(config: &AppConfig) -> Result<AppServices, ServiceError> {
    if config.use_redis {
        #[cfg(feature = "redis")]
        {
            return build_redis_services(config);
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!("USE_REDIS=true but redis feature not enabled, falling back to in-memory");
        }
    }

    let bus: InMemoryBus = Arc::new(InMemoryMessageBus::new());
    let store = Arc::new(InMemoryRendezvousStore::new());
    Ok(AppServices::InMemory(ServiceStack::build(bus, store, config)?))
}

#[cfg(feature = "redis")]
fn build_redis_services(config: &AppConfig) -> Result<AppServices, ServiceError> {
    let bus = RedisPubSubBus::new(&config.redis_url, "genflow:")
        .map_err(|e| ServiceError::Redis(e.to_string()))?;
    let store = RedisRendezvousStore::new(&config.redis_url).map_err(|e| ServiceError::Redis(e.to_string()))?;
    Ok(AppServices::Redis(ServiceStack::build(Arc::new(bus), Arc::new(store), config)?))
}

impl AppServices {
    pub fn submit(&self, request: GenerationRequest) -> Result<JobId, OrchestratorError> {
        match self {
            AppServices::InMemory(s) => s.submit(request),
            #[cfg(feature = "redis")]
            AppServices::Redis(s) => s.submit(request),
        }
    }

    pub fn status(&self, job_id: &JobId) -> Result<JobStatusView, OrchestratorError> {
        match self {
            AppServices::InMemory(s) => s.status(job_id),
            #[cfg(feature = "redis")]
            AppServices::Redis(s) => s.status(job_id),
        }
    }

    pub fn list(&self) -> Vec<JobStatusView> {
        match self {
            AppServices::InMemory(s) => s.list(),
            #[cfg(feature = "redis")]
            AppServices::Redis(s) => s.list(),
        }
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<JobStatusView, OrchestratorError> {
        match self {
            AppServices::InMemory(s) => s.cancel(job_id),
            #[cfg(feature = "redis")]
            AppServices::Redis(s) => s.cancel(job_id),
        }
    }

    /// Blocks for up to the bridge timeout; call from a blocking context.
    pub fn store_info(&self, store_id: &str) -> Result<StoreInfo, BridgeError> {
        match self {
            AppServices::InMemory(s) => s.store_info(store_id),
            #[cfg(feature = "redis")]
            AppServices::Redis(s) => s.store_info(store_id),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory(_) => "in_memory",
            #[cfg(feature = "redis")]
            AppServices::Redis(_) => "redis",
        }
    }

    pub fn worker_names(&self) -> Vec<&str> {
        match self {
            AppServices::InMemory(s) => s.worker_names(),
            #[cfg(feature = "redis")]
            AppServices::Redis(s) => s.worker_names(),
        }
    }
}

/// Store ids starting with `unknown-` are reported as missing.
fn demo_store_info(request: JsonValue) -> Result<JsonValue, String> {
    let store_id = request
        .get("store_id")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| "store_id missing".to_string())?;

    if store_id.starts_with("unknown-") {
        return Err(format!("store {store_id} not found"));
    }

    Ok(json!({
        "store_id": store_id,
        "name": format!("Store {store_id}"),
        "description": "demo catalogue",
        "tags": ["demo"],
    }))
}

/// Generator that fabricates a result key after a few progress steps.
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    step: Duration,
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(20),
        }
    }
}

impl Generator for TemplateGenerator {
    fn generate(&self, request: &GenerationRequested, progress: &ProgressReporter<'_>) -> Result<String, GeneratorError> {
        if request.prompt.trim().is_empty() {
            return Err(GeneratorError("prompt is empty".to_string()));
        }

        for pct in [20, 40, 60, 80] {
            thread::sleep(self.step);
            progress.report(pct);
        }
        Ok(format!("{}/{}/{}.json", request.store.store_id, request.kind, request.job_id))
    }
}
