use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use genflow_core::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_generation).get(list_generations))
        .route("/:job_id", get(get_generation).delete(cancel_generation))
}

pub async fn submit_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitGenerationRequest>,
) -> axum::response::Response {
    let request = match body.into_domain() {
        Ok(r) => r,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };

    match services.submit(request) {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(dto::SubmitAccepted { job_id })).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn list_generations(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(dto::JobList { jobs: services.list() })
}

pub async fn get_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.status(&job_id) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn cancel_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.cancel(&job_id) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
