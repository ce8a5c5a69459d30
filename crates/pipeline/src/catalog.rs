use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamlab_core::JobId;

use crate::artifact::{ArtifactLocator, QcMarker};

/// Read projection of a published job.
///
/// A snapshot taken at publish time; later job mutations do not touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub job_id: JobId,
    pub title: String,
    pub playable: Option<ArtifactLocator>,
    pub qc_markers: Vec<QcMarker>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub published_at: DateTime<Utc>,
}
