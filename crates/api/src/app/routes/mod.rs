use axum::Router;

pub mod generations;
pub mod stores;
pub mod system;

/// Router for the job and store endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/generations", generations::router())
        .nest("/stores", stores::router())
}
