use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactLocator, QcMarker};

/// Number of stages every job carries.
pub const STAGE_COUNT: usize = 4;

/// Name (and identity) of a pipeline stage.
///
/// The declaration order is the execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageName {
    Transcode,
    Thumbnail,
    #[serde(rename = "QC")]
    Qc,
    Package,
}

impl StageName {
    pub const ALL: [StageName; STAGE_COUNT] = [
        StageName::Transcode,
        StageName::Thumbnail,
        StageName::Qc,
        StageName::Package,
    ];

    pub fn first() -> Self {
        Self::ALL[0]
    }

    /// Position of this stage in the sequence.
    pub fn index(self) -> usize {
        match self {
            StageName::Transcode => 0,
            StageName::Thumbnail => 1,
            StageName::Qc => 2,
            StageName::Package => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Transcode => "Transcode",
            StageName::Thumbnail => "Thumbnail",
            StageName::Qc => "QC",
            StageName::Package => "Package",
        }
    }
}

impl core::fmt::Display for StageName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Queued,
    Processing,
    Complete,
    Failed,
}

/// One stage record embedded in a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: StageName,
    pub status: StageStatus,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Stage {
    pub fn queued(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Queued,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == StageStatus::Complete
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::queued(self.name);
    }
}

/// What a stage processor hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Artifacts to merge into the job, keyed by artifact name.
    pub artifacts: BTreeMap<String, ArtifactLocator>,
    /// Replaces the job's QC markers when present.
    pub qc_markers: Option<Vec<QcMarker>>,
    /// Whether a `hls` entry in `artifacts` is real playable output.
    ///
    /// When `false`, the entry is a placeholder and never replaces an existing one.
    pub produced_playable: bool,
}

impl StageOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, name: impl Into<String>, locator: ArtifactLocator) -> Self {
        self.artifacts.insert(name.into(), locator);
        self
    }

    pub fn with_qc_markers(mut self, markers: Vec<QcMarker>) -> Self {
        self.qc_markers = Some(markers);
        self
    }

    pub fn playable(mut self, produced: bool) -> Self {
        self.produced_playable = produced;
        self
    }
}
