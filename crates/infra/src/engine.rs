//! Pipeline engine: runs one stage of one job per delivered message.
//!
//! Contract for a delivery of `(stage, job_id)`:
//!
//! 1. Load the job. A missing job is an unrecoverable error.
//! 2. Admission: a duplicate (stage already complete) changes nothing; a stale
//!    message whose predecessor is not complete is skipped.
//! 3. Mark the stage `processing` and persist.
//! 4. Run the processor.
//! 5. Success: merge output, mark `complete`, persist, then enqueue the next
//!    stage (or leave the job `ready_to_publish` after the last stage).
//! 6. Failure: mark the stage `failed`, persist, and return the error so the
//!    queue's redelivery and dead-letter policy applies.
//!
//! Every persist is conditional on the version that was read. A lost race
//! surfaces as [`StoreError::Conflict`] and the message is redelivered.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use streamlab_core::{DomainError, ExpectedVersion, JobId};
use streamlab_pipeline::{Admission, Job, JobStatus, StageMessage, StageName, StageStatus};
use streamlab_queue::{QueueError, WorkQueue};

use crate::processing::{ProcessError, StageProcessor};
use crate::store::{JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{stage} failed for job {job_id}: {source}")]
    Stage {
        job_id: JobId,
        stage: StageName,
        #[source]
        source: ProcessError,
    },
}

impl EngineError {
    /// Retrying cannot help (e.g. the job record does not exist).
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, EngineError::JobNotFound(_))
    }
}

/// What a successful `handle` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran and completed. `next` is the stage that was enqueued.
    Completed { next: Option<StageName> },
    /// The stage had already completed; the job was left untouched.
    Duplicate,
    /// The stage cannot run yet; the message was dropped.
    Skipped { waiting_on: StageName },
}

pub struct PipelineEngine {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue<StageMessage>>,
    processor: Arc<dyn StageProcessor>,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue<StageMessage>>,
        processor: Arc<dyn StageProcessor>,
    ) -> Self {
        Self {
            store,
            queue,
            processor,
        }
    }

    #[tracing::instrument(
        skip(self, message),
        fields(job_id = %message.job_id, stage = %message.stage, attempt = message.attempt)
    )]
    pub async fn handle(&self, message: &StageMessage) -> Result<StageOutcome, EngineError> {
        let StageMessage {
            stage,
            job_id,
            attempt,
        } = *message;

        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;

        match job.admit(stage) {
            Admission::Run => {}
            Admission::AlreadyComplete => {
                info!("stage already complete; duplicate delivery ignored");
                self.resend_successor(&job, stage).await?;
                return Ok(StageOutcome::Duplicate);
            }
            Admission::OutOfOrder { waiting_on } => {
                warn!(%waiting_on, "predecessor not complete; dropping stale message");
                return Ok(StageOutcome::Skipped { waiting_on });
            }
        }

        job.start_stage(stage, attempt, Utc::now())?;
        self.persist(&mut job).await?;
        debug!("stage marked processing");

        match self.processor.process(stage, &job).await {
            Ok(output) => {
                let next = job.complete_stage(stage, output, Utc::now())?;
                self.persist(&mut job).await?;

                match next {
                    Some(next) => {
                        self.queue.send(StageMessage::new(next, job_id)).await?;
                        info!(%next, "stage complete; next stage enqueued");
                    }
                    None => info!("final stage complete; job ready to publish"),
                }
                Ok(StageOutcome::Completed { next })
            }
            Err(source) => {
                error!(error = %source, "stage processing failed");
                job.fail_stage(stage, &source.to_string(), Utc::now())?;
                if let Err(persist_err) = self.persist(&mut job).await {
                    // The stage stays `processing` in the store; redelivery retries it.
                    error!(error = %persist_err, "could not record stage failure");
                }
                Err(EngineError::Stage {
                    job_id,
                    stage,
                    source,
                })
            }
        }
    }

    async fn persist(&self, job: &mut Job) -> Result<(), StoreError> {
        let version = self.store.put(job, ExpectedVersion::of(&*job)).await?;
        job.set_version(version);
        Ok(())
    }

    /// Covers a crash between persisting `complete` and enqueueing the successor.
    async fn resend_successor(&self, job: &Job, stage: StageName) -> Result<(), QueueError> {
        let Some(next) = stage.next() else {
            return Ok(());
        };
        if job.status() == JobStatus::Processing && job.stage(next).status == StageStatus::Queued {
            debug!(%next, "successor still queued; re-enqueueing");
            self.queue.send(StageMessage::new(next, job.id())).await?;
        }
        Ok(())
    }
}
