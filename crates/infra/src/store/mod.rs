//! Job record storage.
//!
//! The job record is the single source of truth for a job. It is always read
//! and written whole; every write is conditional on the version that was read.
//! Two side indexes exist: "all jobs" (written once at creation) and the
//! published catalog.

use std::sync::Arc;

use async_trait::async_trait;

use streamlab_core::{ExpectedVersion, JobId};
use streamlab_pipeline::{CatalogEntry, Job};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stored version differs from the expected one (lost race).
    #[error("version conflict for job {id}: {detail}")]
    Conflict { id: JobId, detail: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Point read.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Full overwrite, guarded by `expected`. `ExpectedVersion::NEW` creates.
    ///
    /// Returns the version now stored.
    async fn put(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, StoreError>;

    /// Add a job to the "all jobs" index (idempotent).
    async fn index_job(&self, id: JobId) -> Result<(), StoreError>;

    /// Every indexed job id, in no particular order.
    async fn scan_jobs(&self) -> Result<Vec<JobId>, StoreError>;

    /// Upsert a catalog entry keyed by job id.
    async fn put_catalog(&self, entry: &CatalogEntry) -> Result<(), StoreError>;

    /// Every catalog entry, in no particular order.
    async fn scan_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(id).await
    }

    async fn put(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, StoreError> {
        (**self).put(job, expected).await
    }

    async fn index_job(&self, id: JobId) -> Result<(), StoreError> {
        (**self).index_job(id).await
    }

    async fn scan_jobs(&self) -> Result<Vec<JobId>, StoreError> {
        (**self).scan_jobs().await
    }

    async fn put_catalog(&self, entry: &CatalogEntry) -> Result<(), StoreError> {
        (**self).put_catalog(entry).await
    }

    async fn scan_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        (**self).scan_catalog().await
    }
}
