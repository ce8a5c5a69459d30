//! Media pipeline domain module.
//!
//! This crate contains the job state machine for the four-stage media pipeline,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).
//! Callers pass timestamps in explicitly.

pub mod artifact;
pub mod catalog;
pub mod job;
pub mod message;
pub mod stage;

pub use artifact::{ArtifactLocator, PLAYABLE_ARTIFACT, QcMarker, Source, TRANSCODED_ARTIFACT};
pub use catalog::CatalogEntry;
pub use job::{Admission, Job, JobStatus, LogEntry};
pub use message::StageMessage;
pub use stage::{Stage, StageName, StageOutput, StageStatus, STAGE_COUNT};
