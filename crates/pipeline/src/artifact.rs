//! Storage locators and QC findings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Artifact name of the primary playable output.
pub const PLAYABLE_ARTIFACT: &str = "hls";

/// Artifact name used as the playable fallback when no `hls` exists.
pub const TRANSCODED_ARTIFACT: &str = "transcoded";

/// Where an artifact lives: an object in a bucket, or an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactLocator {
    Object { bucket: String, key: String },
    Url(String),
}

impl ArtifactLocator {
    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Object {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }
}

/// The originally uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub bucket: String,
    pub key: String,
    /// Free-form client metadata (file name, size, content type...).
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl Source {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        for (k, v) in meta {
            // bucket/key are authoritative
            if k != "bucket" && k != "key" {
                self.meta.insert(k, v);
            }
        }
        self
    }
}

/// One QC finding at a point in the media timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcMarker {
    /// Offset in seconds.
    pub time: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub note: String,
}

impl QcMarker {
    pub fn new(time: f64, kind: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            time,
            kind: kind.into(),
            note: note.into(),
        }
    }
}
