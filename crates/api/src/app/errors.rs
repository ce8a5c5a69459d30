use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use streamlab_core::DomainError;
use streamlab_infra::{ControlError, StorageError};

pub fn control_error_to_response(err: ControlError) -> axum::response::Response {
    match err {
        ControlError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        ControlError::Domain(e) => domain_error_to_response(e),
        ControlError::Store(e) if e.is_conflict() => {
            json_error(StatusCode::CONFLICT, "conflict", e.to_string())
        }
        ControlError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        ControlError::Queue(e) => {
            tracing::error!(error = %e, "queue failure");
            json_error(StatusCode::BAD_GATEWAY, "queue_error", e.to_string())
        }
        ControlError::Storage(StorageError::InvalidLocation(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        ControlError::Storage(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
        e @ ControlError::CatalogWrite { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "catalog_write_failed",
            e.to_string(),
        ),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::PreconditionFailed(msg) => {
            json_error(StatusCode::CONFLICT, "precondition_failed", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
