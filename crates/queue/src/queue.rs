//! Work-queue contract (mechanics only).
//!
//! A queue hands each message to **one** consumer at a time. A delivered message
//! stays invisible until it is acknowledged, released with [`WorkQueue::nack`], or
//! its visibility timeout lapses, at which point it becomes deliverable again.
//!
//! ```text
//! send ──► ready ──receive──► in flight ──ack──► gone
//!            ▲                    │
//!            └──nack / timeout────┤
//!                                 └──receive count exhausted──► dead letters
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque handle identifying one delivery of a message.
///
/// A redelivered message gets a fresh receipt; acknowledging with a stale one fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Receipt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One receipt of a message by a consumer.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    pub message: M,
    pub receipt: Receipt,
    /// How many times this message has been handed out, including this one.
    pub receive_count: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue lock poisoned")]
    Poisoned,

    #[error("unknown or expired receipt: {0}")]
    UnknownReceipt(Receipt),

    #[error("message serialization failed: {0}")]
    Serialization(String),

    #[error("queue backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait WorkQueue<M>: Send + Sync
where
    M: Send + 'static,
{
    /// Durably enqueue a message.
    async fn send(&self, message: M) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next deliverable message.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery<M>>, QueueError>;

    /// Remove a delivered message for good.
    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Give a delivered message back for redelivery (or dead-lettering).
    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError>;
}

#[async_trait]
impl<M, Q> WorkQueue<M> for Arc<Q>
where
    M: Send + 'static,
    Q: WorkQueue<M> + ?Sized,
{
    async fn send(&self, message: M) -> Result<(), QueueError> {
        (**self).send(message).await
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery<M>>, QueueError> {
        (**self).receive(wait).await
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        (**self).ack(receipt).await
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        (**self).nack(receipt).await
    }
}
