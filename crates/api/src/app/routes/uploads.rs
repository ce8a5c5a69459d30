//! Presigned URLs for direct-to-storage uploads and playback.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::dto::{self, UploadUrlRequest, UrlResponse, ViewUrlQuery};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/upload-url", post(upload_url))
        .route("/view-url", get(view_url))
}

pub async fn upload_url(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let request: UploadUrlRequest = match dto::parse_body(&body) {
        Ok(r) => r,
        Err(res) => return res,
    };
    let key = match dto::require_key(request.key) {
        Ok(k) => k,
        Err(res) => return res,
    };

    match services
        .control
        .upload_url(&key, request.content_type.as_deref())
        .await
    {
        Ok(url) => Json(UrlResponse { url }).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

pub async fn view_url(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ViewUrlQuery>,
) -> axum::response::Response {
    let key = match dto::require_key(query.key) {
        Ok(k) => k,
        Err(res) => return res,
    };

    match services.control.view_url(query.bucket.as_deref(), &key).await {
        Ok(url) => Json(UrlResponse { url }).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}
