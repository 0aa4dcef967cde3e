//! Payloads exchanged by the generation pipeline.

use serde::{Deserialize, Serialize};

use genflow_core::JobId;

/// Message kind of [`GenerationRequested`].
pub const GENERATION_REQUESTED_KIND: &str = "generation.requested";

/// Message kind of [`JobEvent`].
pub const JOB_EVENT_KIND: &str = "job.event";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Scenario,
    Media,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Scenario => "scenario",
            GenerationKind::Media => "media",
        }
    }
}

impl core::fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Caller-chosen id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub store_id: String,
    pub kind: GenerationKind,
    pub prompt: String,
}

/// Bridge request for the store's descriptive data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfoRequest {
    pub store_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub store_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Hand-off from the orchestrator to the generation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequested {
    pub job_id: JobId,
    pub kind: GenerationKind,
    pub prompt: String,
    pub store: StoreInfo,
}

/// Job lifecycle report from the generation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress { job_id: JobId, progress: u8 },
    Completed { job_id: JobId, result_key: String },
    Failed { job_id: JobId, message: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_events_are_tagged_on_the_wire() {
        let event = JobEvent::Completed {
            job_id: JobId::from("job-1"),
            result_key: "results/job-1.json".into(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["job_id"], "job-1");

        let back: JobEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.job_id().as_str(), "job-1");
    }

    #[test]
    fn generation_request_job_id_is_optional() {
        let req: GenerationRequest = serde_json::from_value(serde_json::json!({
            "store_id": "s-1",
            "kind": "media",
            "prompt": "spring collection"
        }))
        .unwrap();

        assert_eq!(req.job_id, None);
        assert_eq!(req.kind, GenerationKind::Media);
    }
}
