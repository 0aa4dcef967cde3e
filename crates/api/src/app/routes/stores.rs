use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/:store_id/info", post(store_info))
}

/// Synchronous store lookup through the correlation bridge.
pub async fn store_info(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    // The bridge blocks its caller while polling.
    let lookup = tokio::task::spawn_blocking(move || services.store_info(&store_id)).await;

    match lookup {
        Ok(Ok(info)) => Json(info).into_response(),
        Ok(Err(e)) => errors::bridge_error_to_response(e),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}
