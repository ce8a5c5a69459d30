use axum::{routing::get, Router};

pub mod catalog;
pub mod jobs;
pub mod system;
pub mod uploads;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/jobs", jobs::router())
        .merge(catalog::router())
        .merge(uploads::router())
}
