//! Well-known topic names.

/// Store info lookups requested through the correlation bridge.
pub const STORE_INFO_REQUEST: &str = "genflow.store_info.request";

/// Responses to [`STORE_INFO_REQUEST`], carrying the request's correlation id.
pub const STORE_INFO_RESPONSE: &str = "genflow.store_info.response";

/// Generation work handed to the generation stage.
pub const GENERATION_REQUESTED: &str = "genflow.generation.requested";

/// Progress/completion/failure reported by the generation stage.
pub const JOB_EVENTS: &str = "genflow.job.events";

/// Periodic job status snapshots for observers (UIs, SSE bridges).
pub const JOB_STATUS: &str = "genflow.job.status";
