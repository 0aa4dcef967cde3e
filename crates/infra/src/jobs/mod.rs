//! Job lifecycle tracking for long-running generation work.
//!
//! ## Design
//!
//! - `JobRegistry` is an explicitly owned, injectable component (wrap it in an
//!   `Arc` and hand it to whoever needs it); tests build isolated instances.
//! - Jobs move `Queued → Running → Succeeded | Failed`; terminal states are
//!   sticky.
//! - Observers attached to a job (progress emitter, deadline watchdog) are
//!   abstract [`ObserverHandle`]s and are released exactly once when the job
//!   ends, or when `complete` is called on a cleanup path.
//!
//! ## Components
//!
//! - `Job`, `JobStatus`, `JobStatusView`: the record and its public view
//! - `JobRegistry`: concurrency-safe state machine
//! - `ObserverHandle`: idempotent cancellation capability
//! - `ProgressEmitter`, `Watchdog`: thread-backed observers

pub mod observer;
pub mod registry;
pub mod types;
pub mod watchers;

pub use observer::{Disposable, ObserverHandle};
pub use registry::{JobRegistry, JobRegistryError};
pub use types::{Job, JobStatus, JobStatusView, Transition, TransitionPolicy};
pub use watchers::{JOB_STATUS_KIND, ProgressEmitter, Watchdog};
