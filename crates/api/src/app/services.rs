use std::sync::Arc;

use streamlab_infra::{
    InMemoryJobStore, InMemoryObjectStore, JobControl, JobStore, ObjectStore, PipelineConfig,
    PipelineEngine, PipelineWorker, StubStageProcessor, WorkerConfig, WorkerHandle,
};
use streamlab_pipeline::StageMessage;
use streamlab_queue::{InMemoryWorkQueue, WorkQueue};

#[cfg(feature = "persistent")]
use streamlab_infra::{PostgresJobStore, work_queue::RedisStreamsWorkQueue};

/// Consumer group shared by every API process reading the stage stream.
#[cfg(feature = "persistent")]
const CONSUMER_GROUP: &str = "streamlab.pipeline";

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error(transparent)]
    Config(#[from] streamlab_infra::ConfigError),

    #[error(transparent)]
    Store(#[from] streamlab_infra::StoreError),

    #[error(transparent)]
    Queue(#[from] streamlab_queue::QueueError),
}

/// Which collaborators back the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    InMemory,
    #[cfg(feature = "persistent")]
    Persistent,
}

/// Everything the HTTP handlers and the worker share.
pub struct AppServices {
    pub control: JobControl,
    pub engine: Arc<PipelineEngine>,
    pub queue: Arc<dyn WorkQueue<StageMessage>>,
    pub backend: Backend,
    worker: WorkerConfig,
}

impl AppServices {
    /// In-memory wiring (dev/test).
    pub fn in_memory(config: &PipelineConfig) -> Self {
        let store = InMemoryJobStore::arc();
        let queue: Arc<InMemoryWorkQueue<StageMessage>> =
            Arc::new(InMemoryWorkQueue::with_config(config.queue));
        Self::assemble(config, store, queue, Backend::InMemory)
    }

    fn assemble(
        config: &PipelineConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue<StageMessage>>,
        backend: Backend,
    ) -> Self {
        // No cloud object store is wired in; uploads and stage outputs stay in process.
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());

        let processor = StubStageProcessor::new(objects.clone(), config.bucket.clone())
            .with_placeholder_playable(config.stub_playable.clone());
        let engine = Arc::new(PipelineEngine::new(
            store.clone(),
            queue.clone(),
            Arc::new(processor),
        ));
        let control = JobControl::new(store, queue.clone(), objects, config.bucket.clone());

        let worker = WorkerConfig::default()
            .with_concurrency(config.worker_concurrency)
            .with_receive_wait(config.queue_wait);

        Self {
            control,
            engine,
            queue,
            backend,
            worker,
        }
    }

    /// Start the queue consumers for this process.
    pub fn spawn_worker(&self) -> WorkerHandle {
        PipelineWorker::spawn(self.engine.clone(), self.queue.clone(), self.worker.clone())
    }
}

pub async fn build_services(config: &PipelineConfig) -> Result<AppServices, ServicesError> {
    if config.use_persistent_stores {
        #[cfg(feature = "persistent")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "persistent"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but persistent feature not enabled, falling back to in-memory"
            );
            return Ok(AppServices::in_memory(config));
        }
    }

    Ok(AppServices::in_memory(config))
}

#[cfg(feature = "persistent")]
async fn build_persistent_services(config: &PipelineConfig) -> Result<AppServices, ServicesError> {
    let database_url = config.database_url()?;

    tracing::info!("connecting to Postgres");
    let store = PostgresJobStore::connect(database_url).await?;
    store.ensure_schema().await?;

    tracing::info!(stream = %config.queue_stream, "connecting to Redis");
    let queue = RedisStreamsWorkQueue::<StageMessage>::connect(
        &config.redis_url,
        config.queue_stream.clone(),
        CONSUMER_GROUP,
        format!("consumer-{}", uuid::Uuid::now_v7()),
        config.queue,
    )
    .await?;

    Ok(AppServices::assemble(
        config,
        Arc::new(store),
        Arc::new(queue),
        Backend::Persistent,
    ))
}
