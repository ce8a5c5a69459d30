use std::sync::Arc;

use axum::{
    extract::Extension,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/catalog", get(list_catalog))
}

pub async fn list_catalog(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.control.list_catalog().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}
