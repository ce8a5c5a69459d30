use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::dto::{self, CreateJobRequest};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/replay", post(replay_job))
        .route("/:id/publish", post(publish_job))
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let request: CreateJobRequest = match dto::parse_body(&body) {
        Ok(r) => r,
        Err(res) => return res,
    };

    match services.control.create_job(request.into()).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.control.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.control.get_job(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

pub async fn replay_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.control.replay_job(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

pub async fn publish_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.control.publish_job(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}
