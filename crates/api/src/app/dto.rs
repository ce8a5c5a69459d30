use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use streamlab_core::JobId;
use streamlab_infra::NewJob;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: Option<String>,
    pub s3_key: Option<String>,
    #[serde(default)]
    pub source_meta: Map<String, Value>,
}

impl From<CreateJobRequest> for NewJob {
    fn from(req: CreateJobRequest) -> Self {
        NewJob {
            title: req.title,
            source_key: req.s3_key,
            source_meta: req.source_meta,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub key: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ViewUrlQuery {
    pub key: Option<String>,
    pub bucket: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

// -------------------------
// Helpers
// -------------------------

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_id",
            "invalid job id",
        )
    })
}

/// Decode an optional JSON body; an empty body means `T::default()`.
pub fn parse_body<T>(body: &[u8]) -> Result<T, axum::response::Response>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            format!("invalid request body: {e}"),
        )
    })
}

/// Non-blank key or a 400.
pub fn require_key(key: Option<String>) -> Result<String, axum::response::Response> {
    key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            "key required",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_uses_defaults() {
        let req: CreateJobRequest = parse_body(b"").unwrap();
        assert!(req.title.is_none());
        assert!(req.source_meta.is_empty());
    }

    #[test]
    fn create_request_reads_camel_case() {
        let req: CreateJobRequest =
            parse_body(br#"{"title":"Clip","s3Key":"uploads/a.mp4","sourceMeta":{"size":12}}"#)
                .unwrap();
        let new_job = NewJob::from(req);
        assert_eq!(new_job.title.as_deref(), Some("Clip"));
        assert_eq!(new_job.source_key.as_deref(), Some("uploads/a.mp4"));
        assert_eq!(new_job.source_meta["size"], 12);
    }

    #[test]
    fn malformed_body_is_rejected() {
        let res = parse_body::<CreateJobRequest>(b"{not json").unwrap_err();
        assert_eq!(res.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn blank_key_is_rejected() {
        assert!(require_key(Some("  ".to_string())).is_err());
        assert!(require_key(None).is_err());
        assert_eq!(require_key(Some("a.mp4".to_string())).unwrap(), "a.mp4");
    }
}
