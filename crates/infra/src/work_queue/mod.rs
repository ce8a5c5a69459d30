//! Work-queue adapters.
//!
//! The contract and the in-memory queue live in `streamlab-queue`; this module
//! re-exports them next to the durable backends.

#[cfg(feature = "redis")]
pub mod redis_streams;

pub use streamlab_queue::{Delivery, InMemoryWorkQueue, QueueConfig, QueueError, Receipt, WorkQueue};

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsWorkQueue;
