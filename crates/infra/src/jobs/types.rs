//! Job record, status and transition policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use genflow_core::JobId;

use super::observer::ObserverHandle;

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet running
    Queued,
    /// Currently being executed
    Running,
    /// Finished with a result
    Succeeded,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Position in the lifecycle; terminal states share the last rank.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Succeeded | JobStatus::Failed => 2,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a refused transition does.
///
/// A refused transition is `start` on a job that is not queued, or
/// `success`/`fail`/`put` on a terminal job. Status is never changed either way.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Return `Ok(Transition::Ignored)`.
    #[default]
    Ignore,
    /// Return `Err(JobRegistryError::InvalidTransition)`.
    Reject,
}

/// Outcome of an accepted registry call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The job changed.
    Applied,
    /// Nothing changed (stale, duplicate or refused under `Ignore`).
    Ignored,
}

/// A tracked generation job.
///
/// The observer handles are owned by the record: whoever ends the job takes
/// them out and disposes them.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 0..=100, non-decreasing while running
    pub progress: u8,
    /// Set only on success
    pub result_key: Option<String>,
    /// Set only on failure
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress_subscription: Option<ObserverHandle>,
    pub watch_subscription: Option<ObserverHandle>,
}

impl Job {
    /// Create a queued job.
    pub fn new(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: 0,
            result_key: None,
            error: None,
            started_at: now,
            updated_at: now,
            progress_subscription: None,
            watch_subscription: None,
        }
    }

    pub fn with_progress_subscription(mut self, handle: ObserverHandle) -> Self {
        self.progress_subscription = Some(handle);
        self
    }

    pub fn with_watch_subscription(mut self, handle: ObserverHandle) -> Self {
        self.watch_subscription = Some(handle);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_succeeded(&mut self, result_key: String) {
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.result_key = Some(result_key);
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.result_key = None;
        self.updated_at = Utc::now();
    }

    /// Raise progress; returns whether anything changed.
    pub(crate) fn record_progress(&mut self, value: u8) -> bool {
        let value = value.min(100);
        if value <= self.progress {
            return false;
        }
        self.progress = value;
        self.updated_at = Utc::now();
        true
    }

    /// Detach both observer handles (the caller disposes them).
    pub(crate) fn take_subscriptions(&mut self) -> Vec<ObserverHandle> {
        self.progress_subscription
            .take()
            .into_iter()
            .chain(self.watch_subscription.take())
            .collect()
    }

    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id.clone(),
            status: self.status,
            progress: self.progress,
            result_key: self.result_key.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public, serialisable snapshot of a job (what status pollers see).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn progress_never_decreases_and_caps_at_100() {
        let mut job = Job::new(JobId::from("j"));
        job.mark_running();

        assert!(job.record_progress(40));
        assert!(!job.record_progress(30));
        assert!(!job.record_progress(40));
        assert!(job.record_progress(250));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn view_omits_unset_outcome_fields() {
        let job = Job::new(JobId::from("j"));
        let json = serde_json::to_value(job.view()).unwrap();

        assert_eq!(json["status"], "queued");
        assert!(json.get("result_key").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn take_subscriptions_empties_both_slots() {
        let mut job = Job::new(JobId::from("j"))
            .with_progress_subscription(ObserverHandle::from_fn("p", || {}))
            .with_watch_subscription(ObserverHandle::from_fn("w", || {}));

        assert_eq!(job.take_subscriptions().len(), 2);
        assert!(job.take_subscriptions().is_empty());
    }
}
