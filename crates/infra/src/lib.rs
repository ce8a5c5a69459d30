//! Infrastructure layer: stores, queues, stage processing, and the pipeline
//! services that tie them together.
//!
//! - `store`: job record + index persistence (in-memory, Postgres)
//! - `storage`: object storage and presigned URLs
//! - `work_queue`: queue adapters (Redis Streams behind the `redis` feature)
//! - `processing`: stage processors
//! - `engine`: per-message stage handler
//! - `control`: operator-facing job actions
//! - `worker`: queue consumer tasks

pub mod config;
pub mod control;
pub mod engine;
pub mod processing;
pub mod storage;
pub mod store;
pub mod work_queue;
pub mod worker;


pub use config::{ConfigError, PipelineConfig};
pub use control::{ControlError, JobControl, NewJob};
pub use engine::{EngineError, PipelineEngine, StageOutcome};
pub use processing::{ProcessError, StageProcessor, StubStageProcessor};
pub use storage::{InMemoryObjectStore, ObjectStore, StorageError};
pub use store::{InMemoryJobStore, JobStore, PostgresJobStore, StoreError};
pub use worker::{PipelineWorker, WorkerConfig, WorkerHandle, WorkerStats};
