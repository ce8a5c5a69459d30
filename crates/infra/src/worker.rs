//! Queue consumer: feeds deliveries to the engine and settles them.
//!
//! Each consumer task loops `receive → handle → ack | nack`. Errors never stop a
//! task; they are logged and the delivery is handed back to the queue, whose
//! receive counter and dead-letter policy decide what happens next.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use streamlab_pipeline::StageMessage;
use streamlab_queue::{Delivery, WorkQueue};

use crate::engine::{PipelineEngine, StageOutcome};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent consumer tasks.
    pub concurrency: usize,
    /// Long-poll wait per receive.
    pub receive_wait: Duration,
    /// Pause after a queue error before polling again.
    pub error_backoff: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            receive_wait: Duration::from_millis(1000),
            error_backoff: Duration::from_millis(500),
            name: "pipeline-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub deliveries: u64,
    pub completed: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub failed: u64,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

/// Handle to control running consumer tasks.
///
/// Dropping the handle also stops the consumers once their current delivery settles.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl WorkerHandle {
    /// Stop polling and wait for in-flight deliveries to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

pub struct PipelineWorker;

impl PipelineWorker {
    /// Spawn `config.concurrency` consumer tasks on the current tokio runtime.
    pub fn spawn(
        engine: Arc<PipelineEngine>,
        queue: Arc<dyn WorkQueue<StageMessage>>,
        config: WorkerConfig,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let tasks = (0..config.concurrency.max(1))
            .map(|n| {
                let consumer = Consumer {
                    name: format!("{}-{n}", config.name),
                    engine: Arc::clone(&engine),
                    queue: Arc::clone(&queue),
                    stats: Arc::clone(&stats),
                    receive_wait: config.receive_wait,
                    error_backoff: config.error_backoff,
                };
                tokio::spawn(consumer.run(shutdown_rx.clone()))
            })
            .collect();

        info!(worker = %config.name, concurrency = config.concurrency, "pipeline worker started");

        WorkerHandle {
            shutdown: shutdown_tx,
            tasks,
            stats,
            started: Instant::now(),
        }
    }
}

struct Consumer {
    name: String,
    engine: Arc<PipelineEngine>,
    queue: Arc<dyn WorkQueue<StageMessage>>,
    stats: Arc<Mutex<WorkerStats>>,
    receive_wait: Duration,
    error_backoff: Duration,
}

impl Consumer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(consumer = %self.name, "consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.queue.receive(self.receive_wait) => received,
            };

            match received {
                Ok(Some(delivery)) => self.settle(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(consumer = %self.name, error = %e, "receive failed");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }

        debug!(consumer = %self.name, "consumer stopped");
    }

    async fn settle(&self, delivery: Delivery<StageMessage>) {
        let Delivery {
            message,
            receipt,
            receive_count,
        } = delivery;

        self.update(|s| {
            s.deliveries += 1;
            s.in_flight += 1;
        });

        let result = self.engine.handle(&message).await;

        self.update(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            match &result {
                Ok(StageOutcome::Completed { .. }) => s.completed += 1,
                Ok(StageOutcome::Duplicate) => s.duplicates += 1,
                Ok(StageOutcome::Skipped { .. }) => s.skipped += 1,
                Err(_) => s.failed += 1,
            }
        });

        let settled = match result {
            Ok(_) => self.queue.ack(&receipt).await,
            Err(e) => {
                if e.is_unrecoverable() {
                    error!(
                        job_id = %message.job_id,
                        stage = %message.stage,
                        receive_count,
                        error = %e,
                        "unrecoverable stage message"
                    );
                } else {
                    warn!(
                        job_id = %message.job_id,
                        stage = %message.stage,
                        receive_count,
                        error = %e,
                        "stage message failed; releasing for redelivery"
                    );
                }
                self.queue.nack(&receipt).await
            }
        };

        if let Err(e) = settled {
            // Visibility timeout already lapsed; the queue redelivers on its own.
            warn!(%receipt, error = %e, "could not settle delivery");
        }
    }

    fn update(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}
