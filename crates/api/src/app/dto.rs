use serde::{Deserialize, Serialize};

use genflow_core::JobId;
use genflow_infra::jobs::JobStatusView;
use genflow_infra::orchestrator::{GenerationKind, GenerationRequest};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitGenerationRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub store_id: String,
    pub kind: GenerationKind,
    pub prompt: String,
}

impl SubmitGenerationRequest {
    /// Validate and convert; returns a client-facing message on failure.
    pub fn into_domain(self) -> Result<GenerationRequest, String> {
        let job_id = match self.job_id {
            Some(raw) => Some(raw.parse::<JobId>().map_err(|e| e.to_string())?),
            None => None,
        };
        if self.store_id.trim().is_empty() {
            return Err("store_id must not be empty".to_string());
        }

        Ok(GenerationRequest {
            job_id,
            store_id: self.store_id,
            kind: self.kind,
            prompt: self.prompt,
        })
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobStatusView>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub backend: &'static str,
    pub workers: Vec<String>,
}
