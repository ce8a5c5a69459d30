use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use streamlab_core::{DomainError, DomainResult, JobId, Versioned};

use crate::artifact::{ArtifactLocator, PLAYABLE_ARTIFACT, QcMarker, Source, TRANSCODED_ARTIFACT};
use crate::catalog::CatalogEntry;
use crate::stage::{STAGE_COUNT, Stage, StageName, StageOutput, StageStatus};

const MAX_TITLE_LEN: usize = 200;

/// Job-level status.
///
/// Stored explicitly and updated in the same transition that changes a stage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    ReadyToPublish,
    Published,
    Failed,
}

/// Timestamped, human-readable line in a job's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Result of checking whether a stage may run now.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The stage is queued, failed, or was interrupted mid-run.
    Run,
    /// The stage already finished; the delivery is a duplicate.
    AlreadyComplete,
    /// The predecessor has not completed (e.g. a message from before a replay).
    OutOfOrder { waiting_on: StageName },
}

/// One media item's run through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    id: JobId,
    title: String,
    status: JobStatus,
    #[serde(deserialize_with = "deserialize_stages")]
    stages: [Stage; STAGE_COUNT],
    logs: Vec<LogEntry>,
    artifacts: BTreeMap<String, ArtifactLocator>,
    qc_markers: Vec<QcMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<Source>,
    #[serde(default)]
    playable_placeholder: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    version: u64,
}

impl Job {
    /// Create a new, never-persisted job with every stage queued.
    pub fn create(
        id: JobId,
        title: impl Into<String>,
        source: Option<Source>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "title cannot exceed {MAX_TITLE_LEN} characters"
            )));
        }

        let mut job = Self {
            id,
            title,
            status: JobStatus::Queued,
            stages: StageName::ALL.map(Stage::queued),
            logs: Vec::new(),
            artifacts: BTreeMap::new(),
            qc_markers: Vec::new(),
            source,
            playable_placeholder: false,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        job.record(now, "Job created.");
        Ok(job)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn stages(&self) -> &[Stage; STAGE_COUNT] {
        &self.stages
    }

    pub fn stage(&self, name: StageName) -> &Stage {
        &self.stages[name.index()]
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn artifacts(&self) -> &BTreeMap<String, ArtifactLocator> {
        &self.artifacts
    }

    pub fn qc_markers(&self) -> &[QcMarker] {
        &self.qc_markers
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    /// `true` when the `hls` artifact is a placeholder rather than real output.
    pub fn playable_placeholder(&self) -> bool {
        self.playable_placeholder
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record the version assigned by the store after a successful write.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Primary playable artifact: `hls`, falling back to `transcoded`.
    pub fn playable(&self) -> Option<&ArtifactLocator> {
        self.artifacts
            .get(PLAYABLE_ARTIFACT)
            .or_else(|| self.artifacts.get(TRANSCODED_ARTIFACT))
    }

    /// Stage the pipeline should run next, if any.
    pub fn current_stage(&self) -> Option<StageName> {
        self.stages.iter().find(|s| !s.is_complete()).map(|s| s.name)
    }

    pub fn admit(&self, name: StageName) -> Admission {
        if self.stage(name).is_complete() {
            return Admission::AlreadyComplete;
        }
        match name.previous() {
            Some(prev) if !self.stage(prev).is_complete() => {
                Admission::OutOfOrder { waiting_on: prev }
            }
            _ => Admission::Run,
        }
    }

    /// Mark a stage as running.
    pub fn start_stage(
        &mut self,
        name: StageName,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        match self.admit(name) {
            Admission::Run => {}
            Admission::AlreadyComplete => {
                return Err(DomainError::precondition(format!("{name} already complete")));
            }
            Admission::OutOfOrder { waiting_on } => {
                return Err(DomainError::invariant(format!(
                    "{name} cannot start before {waiting_on} completes"
                )));
            }
        }

        let stage = &mut self.stages[name.index()];
        stage.status = StageStatus::Processing;
        stage.started_at = Some(now);
        stage.ended_at = None;
        self.status = JobStatus::Processing;
        self.record(now, format!("{name} started (attempt {attempt})."));
        Ok(())
    }

    /// Apply a stage's output and mark it complete.
    ///
    /// Returns the stage to enqueue next, or `None` once the job is ready to publish.
    pub fn complete_stage(
        &mut self,
        name: StageName,
        output: StageOutput,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<StageName>> {
        let current = self.stage(name).status;
        if current != StageStatus::Processing {
            return Err(DomainError::invariant(format!(
                "{name} cannot complete from {current:?}"
            )));
        }

        let StageOutput {
            artifacts,
            qc_markers,
            produced_playable,
        } = output;

        for (key, locator) in artifacts {
            if key == PLAYABLE_ARTIFACT {
                if !produced_playable && self.artifacts.contains_key(PLAYABLE_ARTIFACT) {
                    continue;
                }
                self.playable_placeholder = !produced_playable;
            }
            self.artifacts.insert(key, locator);
        }
        if let Some(markers) = qc_markers {
            self.qc_markers = markers;
        }

        let stage = &mut self.stages[name.index()];
        stage.status = StageStatus::Complete;
        stage.ended_at = Some(now);

        let next = name.next();
        match next {
            Some(_) => {
                self.status = JobStatus::Processing;
                self.record(now, format!("{name} complete."));
            }
            None => {
                self.status = JobStatus::ReadyToPublish;
                self.record(now, format!("{name} complete. Ready to publish."));
            }
        }
        Ok(next)
    }

    /// Mark a stage as failed; the job becomes `failed` until replayed or retried.
    pub fn fail_stage(
        &mut self,
        name: StageName,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.stage(name).is_complete() {
            return Err(DomainError::invariant(format!(
                "{name} is complete and cannot fail"
            )));
        }

        let stage = &mut self.stages[name.index()];
        stage.status = StageStatus::Failed;
        stage.ended_at = Some(now);
        self.status = JobStatus::Failed;
        self.record(now, format!("{name} failed: {reason}"));
        Ok(())
    }

    /// Reset the stage suffix starting at the earliest failed (or else
    /// incomplete) stage.
    ///
    /// Returns the stage to enqueue, or `None` when every stage is complete and
    /// nothing changed.
    pub fn replay(&mut self, now: DateTime<Utc>) -> Option<StageName> {
        let resume = self
            .stages
            .iter()
            .position(|s| s.status == StageStatus::Failed)
            .or_else(|| self.stages.iter().position(|s| !s.is_complete()))?;

        for stage in &mut self.stages[resume..] {
            stage.reset();
        }
        self.status = JobStatus::Queued;

        let name = StageName::ALL[resume];
        self.record(
            now,
            format!("Replay queued from {name} (stage index {resume})."),
        );
        Some(name)
    }

    /// One-way gate from `ready_to_publish` to `published`.
    ///
    /// Returns the catalog projection to write.
    pub fn publish(&mut self, now: DateTime<Utc>) -> DomainResult<CatalogEntry> {
        if self.status != JobStatus::ReadyToPublish {
            return Err(DomainError::precondition(format!(
                "job is not ready to publish (status: {:?})",
                self.status
            )));
        }

        self.status = JobStatus::Published;
        self.record(now, "Published.");

        Ok(CatalogEntry {
            job_id: self.id,
            title: self.title.clone(),
            playable: self.playable().cloned(),
            qc_markers: self.qc_markers.clone(),
            published_at: now,
        })
    }

    /// Append a free-form history line.
    pub fn record(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        self.logs.push(LogEntry {
            at: now,
            message: message.into(),
        });
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

impl Versioned for Job {
    fn version(&self) -> u64 {
        self.version
    }
}

fn deserialize_stages<'de, D>(deserializer: D) -> Result<[Stage; STAGE_COUNT], D::Error>
where
    D: Deserializer<'de>,
{
    let stages = <[Stage; STAGE_COUNT]>::deserialize(deserializer)?;
    for (stage, expected) in stages.iter().zip(StageName::ALL) {
        if stage.name != expected {
            return Err(serde::de::Error::custom(format!(
                "stage {} out of order (expected {expected})",
                stage.name
            )));
        }
    }
    Ok(stages)
}
