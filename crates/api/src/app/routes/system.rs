use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use crate::app::dto;
use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(dto::Health {
        status: "ok",
        backend: services.backend(),
        workers: services.worker_names().into_iter().map(str::to_string).collect(),
    })
}
