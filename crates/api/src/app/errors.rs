use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use genflow_core::ErrorKind;
use genflow_infra::correlation::BridgeError;
use genflow_infra::orchestrator::OrchestratorError;

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Decode | ErrorKind::Remote => StatusCode::BAD_GATEWAY,
        ErrorKind::Publish => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Encode | ErrorKind::Store | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn orchestrator_error_to_response(err: OrchestratorError) -> axum::response::Response {
    let kind = err.kind();
    json_error(status_for(kind), kind.as_str(), err.to_string())
}

pub fn bridge_error_to_response(err: BridgeError) -> axum::response::Response {
    let kind = err.kind();
    let message = if err.is_timeout() {
        format!("{err}; try again")
    } else {
        err.to_string()
    };
    json_error(status_for(kind), kind.as_str(), message)
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Decode), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
    }
}
