//! Work-queue abstraction used to hand stage work between pipeline steps.
//!
//! Delivery is **at-least-once**: a message may be delivered several times and
//! consumers must be idempotent. Retry and dead-letter policy belong to the
//! queue, not to the consumer.

pub mod in_memory;
pub mod queue;

pub use in_memory::{InMemoryWorkQueue, QueueConfig};
pub use queue::{Delivery, QueueError, Receipt, WorkQueue};
