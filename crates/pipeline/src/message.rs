use serde::{Deserialize, Deserializer, Serialize};
use streamlab_core::JobId;

use crate::stage::StageName;

/// Work-queue message asking for one stage of one job to run.
///
/// `attempt` is informational and starts at 1; redelivery policy belongs to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMessage {
    #[serde(rename = "type")]
    pub stage: StageName,
    pub job_id: JobId,
    #[serde(deserialize_with = "attempt_from_one")]
    pub attempt: u32,
}

fn attempt_from_one<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let attempt = u32::deserialize(deserializer)?;
    if attempt == 0 {
        return Err(serde::de::Error::custom("attempt must be at least 1"));
    }
    Ok(attempt)
}

impl StageMessage {
    pub fn new(stage: StageName, job_id: JobId) -> Self {
        Self {
            stage,
            job_id,
            attempt: 1,
        }
    }

    /// First message of a freshly created job.
    pub fn first(job_id: JobId) -> Self {
        Self::new(StageName::first(), job_id)
    }
}
