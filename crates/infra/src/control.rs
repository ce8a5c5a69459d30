//! Operator-facing job actions: create, read, list, replay, publish.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use streamlab_core::{DomainError, ExpectedVersion, JobId};
use streamlab_pipeline::{CatalogEntry, Job, Source, StageMessage};
use streamlab_queue::{QueueError, WorkQueue};

use crate::storage::{ObjectStore, PRESIGN_EXPIRY, StorageError};
use crate::store::{JobStore, StoreError};

/// Title used when a client does not supply one.
pub const DEFAULT_TITLE: &str = "Upload";

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The job is published but its catalog entry could not be written.
    #[error("job {job_id} published but catalog write failed: {source}")]
    CatalogWrite {
        job_id: JobId,
        #[source]
        source: StoreError,
    },
}

/// Request to create a job.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub title: Option<String>,
    /// Object key of the uploaded source, if any.
    pub source_key: Option<String>,
    pub source_meta: Map<String, Value>,
}

pub struct JobControl {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue<StageMessage>>,
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl JobControl {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue<StageMessage>>,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            objects,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Persist a new job, add it to the index, and enqueue its first stage.
    #[tracing::instrument(skip(self, request))]
    pub async fn create_job(&self, request: NewJob) -> Result<Job, ControlError> {
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let source = request
            .source_key
            .filter(|k| !k.trim().is_empty())
            .map(|key| Source::new(&self.bucket, key).with_meta(request.source_meta));

        let mut job = Job::create(JobId::new(), title, source, Utc::now())?;
        let version = self.store.put(&job, ExpectedVersion::NEW).await?;
        job.set_version(version);
        self.store.index_job(job.id()).await?;
        self.queue.send(StageMessage::first(job.id())).await?;

        info!(job_id = %job.id(), "job created");
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, ControlError> {
        self.store.get(id).await?.ok_or(ControlError::NotFound(id))
    }

    /// Every indexed job, newest first. Index entries without a record are skipped.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, ControlError> {
        let ids = self.store.scan_jobs().await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get(id).await? {
                Some(job) => jobs.push(job),
                None => debug!(job_id = %id, "index entry without job record"),
            }
        }
        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(jobs)
    }

    /// Reset the job from its first failed (or incomplete) stage and re-enqueue it.
    ///
    /// A job with every stage complete is returned unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn replay_job(&self, id: JobId) -> Result<Job, ControlError> {
        let mut job = self.get_job(id).await?;

        let Some(resume) = job.replay(Utc::now()) else {
            info!(job_id = %id, "nothing to replay");
            return Ok(job);
        };

        let version = self.store.put(&job, ExpectedVersion::of(&job)).await?;
        job.set_version(version);
        self.queue.send(StageMessage::new(resume, id)).await?;

        info!(job_id = %id, stage = %resume, "replay queued");
        Ok(job)
    }

    /// Publish a ready job and write its catalog entry.
    ///
    /// The job is persisted first. If the catalog write then fails, the job stays
    /// published and [`ControlError::CatalogWrite`] reports the gap.
    #[tracing::instrument(skip(self))]
    pub async fn publish_job(&self, id: JobId) -> Result<Job, ControlError> {
        let mut job = self.get_job(id).await?;
        let entry = job.publish(Utc::now())?;

        let version = self.store.put(&job, ExpectedVersion::of(&job)).await?;
        job.set_version(version);

        if let Err(source) = self.store.put_catalog(&entry).await {
            error!(job_id = %id, error = %source, "job published but catalog write failed");
            return Err(ControlError::CatalogWrite { job_id: id, source });
        }

        info!(job_id = %id, "job published");
        Ok(job)
    }

    /// Catalog entries, most recently published first.
    pub async fn list_catalog(&self) -> Result<Vec<CatalogEntry>, ControlError> {
        let mut entries = self.store.scan_catalog().await?;
        entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(entries)
    }

    pub async fn upload_url(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, ControlError> {
        Ok(self
            .objects
            .presign_put(&self.bucket, key, content_type, PRESIGN_EXPIRY)
            .await?)
    }

    /// Presigned read URL; `bucket` defaults to the pipeline bucket.
    pub async fn view_url(&self, bucket: Option<&str>, key: &str) -> Result<String, ControlError> {
        let bucket = bucket.filter(|b| !b.is_empty()).unwrap_or(self.bucket.as_str());
        Ok(self.objects.presign_get(bucket, key, PRESIGN_EXPIRY).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use streamlab_core::Versioned;
    use streamlab_pipeline::{JobStatus, StageName, StageOutput};
    use streamlab_queue::InMemoryWorkQueue;

    use crate::storage::InMemoryObjectStore;
    use crate::store::InMemoryJobStore;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        queue: Arc<InMemoryWorkQueue<StageMessage>>,
        control: JobControl,
    }

    fn fixture() -> Fixture {
        let store = InMemoryJobStore::arc();
        let queue: Arc<InMemoryWorkQueue<StageMessage>> = Arc::new(InMemoryWorkQueue::new());
        let control = JobControl::new(
            store.clone(),
            queue.clone(),
            Arc::new(InMemoryObjectStore::new()),
            "media",
        );
        Fixture {
            store,
            queue,
            control,
        }
    }

    /// Push a job straight to `ready_to_publish` without the engine.
    async fn finish(store: &InMemoryJobStore, id: JobId) {
        let mut job = store.get(id).await.unwrap().unwrap();
        for stage in StageName::ALL {
            job.start_stage(stage, 1, Utc::now()).unwrap();
            job.complete_stage(stage, StageOutput::empty(), Utc::now())
                .unwrap();
        }
        store.put(&job, ExpectedVersion::of(&job)).await.unwrap();
    }

    #[tokio::test]
    async fn create_defaults_title_and_builds_source() {
        let f = fixture();
        let meta = json!({"name": "clip.mp4"}).as_object().cloned().unwrap();
        let job = f
            .control
            .create_job(NewJob {
                title: None,
                source_key: Some("uploads/clip.mp4".to_string()),
                source_meta: meta,
            })
            .await
            .unwrap();

        assert_eq!(job.title(), DEFAULT_TITLE);
        assert_eq!(job.version(), 1);
        let source = job.source().unwrap();
        assert_eq!(source.bucket, "media");
        assert_eq!(source.key, "uploads/clip.mp4");
        assert_eq!(source.meta["name"], "clip.mp4");
        assert_eq!(f.store.scan_jobs().await.unwrap(), vec![job.id()]);
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let f = fixture();
        let err = f.control.get_job(JobId::new()).await.unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_skips_dangling_index_entries() {
        let f = fixture();
        let first = f.control.create_job(NewJob::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = f.control.create_job(NewJob::default()).await.unwrap();
        f.store.index_job(JobId::new()).await.unwrap();

        let ids: Vec<_> = f
            .control
            .list_jobs()
            .await
            .unwrap()
            .iter()
            .map(Job::id)
            .collect();
        assert_eq!(ids, vec![second.id(), first.id()]);
    }

    #[tokio::test]
    async fn publish_requires_ready_job() {
        let f = fixture();
        let job = f.control.create_job(NewJob::default()).await.unwrap();
        let err = f.control.publish_job(job.id()).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Domain(DomainError::PreconditionFailed(_))
        ));
        assert!(f.store.scan_catalog().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_writes_catalog_once() {
        let f = fixture();
        let job = f.control.create_job(NewJob::default()).await.unwrap();
        finish(&f.store, job.id()).await;

        let published = f.control.publish_job(job.id()).await.unwrap();
        assert_eq!(published.status(), JobStatus::Published);
        assert!(f.control.publish_job(job.id()).await.is_err());

        let catalog = f.control.list_catalog().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].job_id, job.id());
    }

    #[tokio::test]
    async fn replay_of_finished_job_changes_nothing() {
        let f = fixture();
        let job = f.control.create_job(NewJob::default()).await.unwrap();
        finish(&f.store, job.id()).await;
        let before = f.store.get(job.id()).await.unwrap().unwrap();
        let queued = f.queue.ready_messages().len();

        let after = f.control.replay_job(job.id()).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(f.queue.ready_messages().len(), queued);
    }

    /// Job store whose catalog writes always fail.
    struct BrokenCatalog(InMemoryJobStore);

    #[async_trait]
    impl JobStore for BrokenCatalog {
        async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
            self.0.get(id).await
        }
        async fn put(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, StoreError> {
            self.0.put(job, expected).await
        }
        async fn index_job(&self, id: JobId) -> Result<(), StoreError> {
            self.0.index_job(id).await
        }
        async fn scan_jobs(&self) -> Result<Vec<JobId>, StoreError> {
            self.0.scan_jobs().await
        }
        async fn put_catalog(&self, _entry: &CatalogEntry) -> Result<(), StoreError> {
            Err(StoreError::Storage("catalog table unavailable".to_string()))
        }
        async fn scan_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
            self.0.scan_catalog().await
        }
    }

    #[tokio::test]
    async fn catalog_failure_after_publish_is_reported() {
        let store = Arc::new(BrokenCatalog(InMemoryJobStore::new()));
        let control = JobControl::new(
            store.clone(),
            Arc::new(InMemoryWorkQueue::<StageMessage>::new()),
            Arc::new(InMemoryObjectStore::new()),
            "media",
        );
        let job = control.create_job(NewJob::default()).await.unwrap();
        finish(&store.0, job.id()).await;

        let err = control.publish_job(job.id()).await.unwrap_err();
        assert!(matches!(err, ControlError::CatalogWrite { job_id, .. } if job_id == job.id()));

        // Accepted inconsistency: the job is published, the catalog is not.
        let stored = store.get(job.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Published);
        assert!(store.scan_catalog().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presigned_urls_default_to_pipeline_bucket() {
        let f = fixture();
        let put = f.control.upload_url("uploads/a.mp4", Some("video/mp4")).await.unwrap();
        assert!(put.starts_with("memory://media/uploads/a.mp4"));
        let get = f.control.view_url(None, "uploads/a.mp4").await.unwrap();
        assert!(get.starts_with("memory://media/"));
        let other = f.control.view_url(Some("archive"), "x").await.unwrap();
        assert!(other.starts_with("memory://archive/x"));
        assert!(f.control.upload_url("", None).await.is_err());
    }
}
