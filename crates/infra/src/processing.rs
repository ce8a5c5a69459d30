//! Stage processors: the work behind each pipeline stage.
//!
//! The engine only cares whether a processor succeeded and what output it
//! produced. `StubStageProcessor` writes small marker objects instead of doing
//! real media work.

use std::sync::Arc;

use async_trait::async_trait;

use streamlab_pipeline::{ArtifactLocator, Job, PLAYABLE_ARTIFACT, QcMarker, StageName, StageOutput};

use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait StageProcessor: Send + Sync {
    async fn process(&self, stage: StageName, job: &Job) -> Result<StageOutput, ProcessError>;
}

#[async_trait]
impl<P> StageProcessor for Arc<P>
where
    P: StageProcessor + ?Sized,
{
    async fn process(&self, stage: StageName, job: &Job) -> Result<StageOutput, ProcessError> {
        (**self).process(stage, job).await
    }
}

/// Findings reported by the QC stand-in.
pub fn sample_qc_markers() -> Vec<QcMarker> {
    vec![
        QcMarker::new(12.0, "loudness", "Loudness spike detected"),
        QcMarker::new(47.0, "black_frame", "Possible black frame"),
        QcMarker::new(83.0, "caption", "Caption missing period"),
    ]
}

/// Deterministic stand-in for the real media workers.
///
/// Output keys depend only on job id and stage, so re-running a stage
/// overwrites the same objects.
pub struct StubStageProcessor {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    placeholder_playable: Option<String>,
}

impl StubStageProcessor {
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
            placeholder_playable: None,
        }
    }

    /// Make the Package stage hand back `url` as a placeholder playable.
    pub fn with_placeholder_playable(mut self, url: Option<String>) -> Self {
        self.placeholder_playable = url;
        self
    }

    async fn write_marker(
        &self,
        job: &Job,
        file: &str,
        body: String,
    ) -> Result<ArtifactLocator, ProcessError> {
        let key = format!("outputs/{}/{file}", job.id());
        self.objects
            .put_object(&self.bucket, &key, body.into_bytes(), "text/plain")
            .await?;
        Ok(ArtifactLocator::object(&self.bucket, key))
    }
}

#[async_trait]
impl StageProcessor for StubStageProcessor {
    async fn process(&self, stage: StageName, job: &Job) -> Result<StageOutput, ProcessError> {
        let output = match stage {
            StageName::Transcode => {
                let locator = self
                    .write_marker(
                        job,
                        "transcoded.txt",
                        format!("Transcoded output stub for job {}", job.id()),
                    )
                    .await?;
                StageOutput::empty().with_artifact("transcoded", locator)
            }
            StageName::Thumbnail => {
                let locator = self
                    .write_marker(
                        job,
                        "thumb.txt",
                        format!("Thumbnail stub for job {}", job.id()),
                    )
                    .await?;
                StageOutput::empty().with_artifact("thumbnail", locator)
            }
            StageName::Qc => StageOutput::empty().with_qc_markers(sample_qc_markers()),
            StageName::Package => match &self.placeholder_playable {
                Some(url) => StageOutput::empty()
                    .with_artifact(PLAYABLE_ARTIFACT, ArtifactLocator::url(url.clone()))
                    .playable(false),
                None => StageOutput::empty(),
            },
        };

        tracing::debug!(
            job_id = %job.id(),
            stage = %stage,
            artifacts = output.artifacts.len(),
            "stub stage processed"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;
    use chrono::Utc;
    use streamlab_core::JobId;

    fn setup(placeholder: Option<&str>) -> (Arc<InMemoryObjectStore>, StubStageProcessor, Job) {
        let objects = Arc::new(InMemoryObjectStore::new());
        let processor = StubStageProcessor::new(objects.clone(), "media")
            .with_placeholder_playable(placeholder.map(str::to_string));
        let job = Job::create(JobId::new(), "clip", None, Utc::now()).unwrap();
        (objects, processor, job)
    }

    #[tokio::test]
    async fn transcode_writes_marker_object() {
        let (objects, processor, job) = setup(None);
        let output = processor.process(StageName::Transcode, &job).await.unwrap();

        let key = format!("outputs/{}/transcoded.txt", job.id());
        assert_eq!(
            output.artifacts.get("transcoded"),
            Some(&ArtifactLocator::object("media", key.clone()))
        );
        assert!(objects.get_object("media", &key).is_some());
    }

    #[tokio::test]
    async fn qc_reports_sample_markers() {
        let (_, processor, job) = setup(None);
        let output = processor.process(StageName::Qc, &job).await.unwrap();
        let markers = output.qc_markers.unwrap();
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[1].kind, "black_frame");
    }

    #[tokio::test]
    async fn package_offers_placeholder_only_when_configured() {
        let (_, processor, job) = setup(None);
        let output = processor.process(StageName::Package, &job).await.unwrap();
        assert!(output.artifacts.is_empty());

        let (_, processor, job) = setup(Some("https://stub/x.m3u8"));
        let output = processor.process(StageName::Package, &job).await.unwrap();
        assert!(!output.produced_playable);
        assert_eq!(
            output.artifacts.get(PLAYABLE_ARTIFACT),
            Some(&ArtifactLocator::url("https://stub/x.m3u8"))
        );
    }
}
