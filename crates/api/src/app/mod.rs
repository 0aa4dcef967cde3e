//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: bus, store, bridge, registry and worker wiring
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppConfig, AppServices, ServiceError};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: &AppConfig) -> Result<Router, ServiceError> {
    let services = Arc::new(services::build_services(config)?);

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services))))
}
