//! In-memory job store for tests/dev.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use streamlab_core::{ExpectedVersion, JobId, Versioned};
use streamlab_pipeline::{CatalogEntry, Job};

use super::{JobStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    index: RwLock<BTreeSet<JobId>>,
    catalog: RwLock<HashMap<JobId, CatalogEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn put(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let actual = jobs.get(&job.id()).map_or(0, |stored| stored.version());

        expected.check(actual).map_err(|e| StoreError::Conflict {
            id: job.id(),
            detail: e.to_string(),
        })?;

        let version = actual + 1;
        let mut stored = job.clone();
        stored.set_version(version);
        jobs.insert(job.id(), stored);
        Ok(version)
    }

    async fn index_job(&self, id: JobId) -> Result<(), StoreError> {
        self.index.write().map_err(|_| poisoned())?.insert(id);
        Ok(())
    }

    async fn scan_jobs(&self) -> Result<Vec<JobId>, StoreError> {
        Ok(self.index.read().map_err(|_| poisoned())?.iter().copied().collect())
    }

    async fn put_catalog(&self, entry: &CatalogEntry) -> Result<(), StoreError> {
        self.catalog
            .write()
            .map_err(|_| poisoned())?
            .insert(entry.job_id, entry.clone());
        Ok(())
    }

    async fn scan_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self
            .catalog
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect())
    }
}
