//! Generation pipeline: job submission, input gathering through the
//! correlation bridge, hand-off to the generation stage, and job event intake.

mod error;
mod generation;
mod messages;
mod stage;

pub use error::OrchestratorError;
pub use generation::GenerationOrchestrator;
pub use messages::{
    GENERATION_REQUESTED_KIND, GenerationKind, GenerationRequest, GenerationRequested, JOB_EVENT_KIND, JobEvent,
    StoreInfo, StoreInfoRequest,
};
pub use stage::{GenerationWorker, Generator, GeneratorError, JobEventWorker, ProgressReporter};
