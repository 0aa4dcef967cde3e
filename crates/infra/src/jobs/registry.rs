//! Concurrency-safe job registry.
//!
//! Locking discipline:
//! - the outer `RwLock` guards only the id → record map and is held just long
//!   enough to look up, insert or remove an entry;
//! - each record has its own `Mutex`, so transitions on different jobs never
//!   wait on each other, and transitions on the same job are serialised;
//! - observer handles are taken out under the record lock and disposed after
//!   it is released.
//!
//! Poisoned locks are recovered: every mutation is a handful of field
//! assignments and observers never run under a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use genflow_core::{ErrorKind, JobId};

use super::observer::ObserverHandle;
use super::types::{Job, JobStatus, JobStatusView, Transition, TransitionPolicy};
use crate::config::RegistryConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobRegistryError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("invalid transition for job {job_id}: cannot {action} when {from}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        action: &'static str,
    },
}

impl JobRegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobRegistryError::NotFound(_) => ErrorKind::NotFound,
            JobRegistryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            JobRegistryError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }
}

type Entry = Arc<Mutex<Job>>;

/// Registry of in-flight and finished jobs.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Entry>>,
    policy: TransitionPolicy,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TransitionPolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::with_policy(config.policy)
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Register a new queued job. Duplicate ids are rejected, never overwritten.
    pub fn init(&self, job_id: JobId) -> Result<Job, JobRegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job_id) {
            return Err(JobRegistryError::AlreadyExists(job_id));
        }

        let job = Job::new(job_id.clone());
        jobs.insert(job_id.clone(), Arc::new(Mutex::new(job.clone())));
        debug!(job_id = %job_id, "job queued");
        Ok(job)
    }

    /// `Queued → Running`.
    pub fn start(&self, job_id: &JobId) -> Result<Transition, JobRegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = lock(&entry);

        if job.status != JobStatus::Queued {
            return self.refuse(&job, "start");
        }

        job.mark_running();
        debug!(job_id = %job_id, "job running");
        Ok(Transition::Applied)
    }

    /// Record progress of a running job.
    ///
    /// Stale values (not above the current progress) and updates for jobs that
    /// are not running are ignored without error: progress reports travel over
    /// the bus and may arrive late or out of order.
    pub fn progress(&self, job_id: &JobId, value: u8) -> Result<Transition, JobRegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = lock(&entry);

        if job.status == JobStatus::Running && job.record_progress(value) {
            Ok(Transition::Applied)
        } else {
            Ok(Transition::Ignored)
        }
    }

    /// Finish a job successfully and release its observers.
    pub fn success(&self, job_id: &JobId, result_key: impl Into<String>) -> Result<Transition, JobRegistryError> {
        let result_key = result_key.into();
        self.finish(job_id, "succeed", |job| job.mark_succeeded(result_key))
    }

    /// Fail a job and release its observers.
    pub fn fail(&self, job_id: &JobId, message: impl Into<String>) -> Result<Transition, JobRegistryError> {
        let message = message.into();
        self.finish(job_id, "fail", |job| job.mark_failed(message))
    }

    fn finish(
        &self,
        job_id: &JobId,
        action: &'static str,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Transition, JobRegistryError> {
        let entry = self.entry(job_id)?;

        let released = {
            let mut job = lock(&entry);
            if job.is_terminal() {
                return self.refuse(&job, action);
            }
            apply(&mut job);
            info!(job_id = %job_id, status = %job.status, "job finished");
            job.take_subscriptions()
        };

        dispose_all(job_id, released);
        Ok(Transition::Applied)
    }

    /// Snapshot of a job, if known.
    pub fn find(&self, job_id: &JobId) -> Option<Job> {
        let entry = self.entry(job_id).ok()?;
        let job = lock(&entry).clone();
        Some(job)
    }

    /// Public status view of a job.
    pub fn status(&self, job_id: &JobId) -> Result<JobStatusView, JobRegistryError> {
        let entry = self.entry(job_id)?;
        let view = lock(&entry).view();
        Ok(view)
    }

    /// Status views of every tracked job, oldest first.
    pub fn list(&self) -> Vec<JobStatusView> {
        let entries: Vec<Entry> = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            jobs.values().cloned().collect()
        };

        let mut views: Vec<_> = entries.iter().map(|e| lock(e).view()).collect();
        views.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.job_id.cmp(&b.job_id)));
        views
    }

    /// Replace a job record wholesale (used to attach observer handles).
    ///
    /// - Handles present in the old record but not in the new one are disposed.
    /// - If the stored job is already terminal the replacement is refused and
    ///   the handles it carries are disposed, so a late attach cannot leak.
    /// - If the replacement itself is terminal its handles are released too.
    /// - A replacement built from a stale snapshot never moves the job back:
    ///   status keeps the later lifecycle stage and progress keeps its maximum.
    pub fn put(&self, mut job: Job) -> Result<Transition, JobRegistryError> {
        let job_id = job.job_id.clone();
        let entry = self.entry(&job_id)?;

        let (outcome, released) = {
            let mut current = lock(&entry);
            if current.is_terminal() {
                (self.refuse(&current, "replace"), job.take_subscriptions())
            } else {
                let mut released = Vec::new();
                released.extend(superseded(current.progress_subscription.take(), &job.progress_subscription));
                released.extend(superseded(current.watch_subscription.take(), &job.watch_subscription));
                if job.is_terminal() {
                    released.extend(job.take_subscriptions());
                }
                if job.status.rank() < current.status.rank() {
                    debug!(job_id = %job_id, status = %current.status, stale = %job.status, "stale status not applied");
                    job.status = current.status;
                }
                job.progress = job.progress.max(current.progress);
                *current = job;
                (Ok(Transition::Applied), released)
            }
        };

        dispose_all(&job_id, released);
        outcome
    }

    /// Dispose a job's observers regardless of status.
    ///
    /// Cleanup path for work that ends outside `success`/`fail` (for example
    /// external cancellation). Returns how many handles were released by this
    /// call; handles already released earlier are not counted again.
    pub fn complete(&self, job_id: &JobId) -> Result<usize, JobRegistryError> {
        let entry = self.entry(job_id)?;
        let released = lock(&entry).take_subscriptions();
        Ok(dispose_all(job_id, released))
    }

    /// Stop tracking a job, releasing anything still attached.
    pub fn remove(&self, job_id: &JobId) -> Result<Job, JobRegistryError> {
        let entry = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            jobs.remove(job_id)
                .ok_or_else(|| JobRegistryError::NotFound(job_id.clone()))?
        };

        let (snapshot, released) = {
            let mut job = lock(&entry);
            let released = job.take_subscriptions();
            (job.clone(), released)
        };
        dispose_all(job_id, released);
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, job_id: &JobId) -> Result<Entry, JobRegistryError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| JobRegistryError::NotFound(job_id.clone()))
    }

    fn refuse(&self, job: &Job, action: &'static str) -> Result<Transition, JobRegistryError> {
        match self.policy {
            TransitionPolicy::Ignore => {
                debug!(job_id = %job.job_id, status = %job.status, action, "transition ignored");
                Ok(Transition::Ignored)
            }
            TransitionPolicy::Reject => {
                warn!(job_id = %job.job_id, status = %job.status, action, "transition rejected");
                Err(JobRegistryError::InvalidTransition {
                    job_id: job.job_id.clone(),
                    from: job.status,
                    action,
                })
            }
        }
    }
}

fn lock(entry: &Entry) -> MutexGuard<'_, Job> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The old handle, unless the replacement keeps the very same observer.
fn superseded(old: Option<ObserverHandle>, new: &Option<ObserverHandle>) -> Option<ObserverHandle> {
    match (old, new) {
        (Some(old), Some(new)) if old.same_as(new) => None,
        (old, _) => old,
    }
}

fn dispose_all(job_id: &JobId, handles: Vec<ObserverHandle>) -> usize {
    let mut disposed = 0;
    for handle in handles {
        if handle.dispose() {
            disposed += 1;
            debug!(job_id = %job_id, observer = handle.label(), "observer disposed");
        }
    }
    disposed
}
