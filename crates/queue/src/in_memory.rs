//! In-memory work queue for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::queue::{Delivery, QueueError, Receipt, WorkQueue};

/// Redelivery policy.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// How long a delivered message stays invisible before redelivery.
    pub visibility_timeout: Duration,
    /// Receives after which a released message is dead-lettered instead.
    pub max_receive_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 5,
        }
    }
}

#[derive(Debug)]
struct Entry<M> {
    message: M,
    receive_count: u32,
}

#[derive(Debug)]
struct InFlight<M> {
    entry: Entry<M>,
    deadline: Instant,
}

#[derive(Debug)]
struct State<M> {
    ready: VecDeque<Entry<M>>,
    in_flight: HashMap<Receipt, InFlight<M>>,
    dead: Vec<M>,
    next_receipt: u64,
}

/// In-memory at-least-once queue.
///
/// - No IO
/// - FIFO among visible messages
/// - Visibility timeout, receive counting, and a dead-letter list
#[derive(Debug)]
pub struct InMemoryWorkQueue<M> {
    config: QueueConfig,
    state: Mutex<State<M>>,
    notify: Notify,
}

impl<M> InMemoryWorkQueue<M> {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
                dead: Vec::new(),
                next_receipt: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Messages currently invisible to consumers.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    fn release(&self, state: &mut State<M>, entry: Entry<M>) {
        if entry.receive_count >= self.config.max_receive_count {
            tracing::warn!(
                receive_count = entry.receive_count,
                "message exhausted its receives; dead-lettering"
            );
            state.dead.push(entry.message);
        } else {
            state.ready.push_back(entry);
            self.notify.notify_one();
        }
    }

    fn reclaim_expired(&self, state: &mut State<M>, now: Instant) {
        let expired: Vec<Receipt> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(r, _)| r.clone())
            .collect();

        for receipt in expired {
            if let Some(flight) = state.in_flight.remove(&receipt) {
                tracing::debug!(%receipt, "visibility timeout lapsed; releasing message");
                self.release(state, flight.entry);
            }
        }
    }
}

impl<M: Clone> InMemoryWorkQueue<M> {
    /// Snapshot of visible messages, oldest first.
    pub fn ready_messages(&self) -> Vec<M> {
        self.state
            .lock()
            .map(|s| s.ready.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of dead-lettered messages.
    pub fn dead_letters(&self) -> Vec<M> {
        self.state
            .lock()
            .map(|s| s.dead.clone())
            .unwrap_or_default()
    }
}

impl<M> Default for InMemoryWorkQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> WorkQueue<M> for InMemoryWorkQueue<M>
where
    M: Clone + Send + 'static,
{
    async fn send(&self, message: M) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state.ready.push_back(Entry {
            message,
            receive_count: 0,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery<M>>, QueueError> {
        let give_up = Instant::now() + wait;

        loop {
            let now = Instant::now();
            let next_deadline = {
                let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
                self.reclaim_expired(&mut state, now);

                if let Some(mut entry) = state.ready.pop_front() {
                    entry.receive_count += 1;
                    state.next_receipt += 1;
                    let receipt = Receipt::new(format!("r-{}", state.next_receipt));
                    let delivery = Delivery {
                        message: entry.message.clone(),
                        receipt: receipt.clone(),
                        receive_count: entry.receive_count,
                    };
                    state.in_flight.insert(
                        receipt,
                        InFlight {
                            entry,
                            deadline: now + self.config.visibility_timeout,
                        },
                    );
                    return Ok(Some(delivery));
                }

                state.in_flight.values().map(|f| f.deadline).min()
            };

            if now >= give_up {
                return Ok(None);
            }

            let wake_at = next_deadline.map_or(give_up, |d| d.min(give_up));
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.clone()))
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let flight = state
            .in_flight
            .remove(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.clone()))?;
        self.release(&mut state, flight.entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_queue(max_receive_count: u32) -> InMemoryWorkQueue<&'static str> {
        InMemoryWorkQueue::with_config(QueueConfig {
            visibility_timeout: Duration::from_millis(50),
            max_receive_count,
        })
    }

    const SHORT: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let q = fast_queue(3);
        q.send("a").await.unwrap();
        q.send("b").await.unwrap();
        assert_eq!(q.ready_messages(), vec!["a", "b"]);

        let first = q.receive(SHORT).await.unwrap().unwrap();
        assert_eq!(first.message, "a");
        assert_eq!(first.receive_count, 1);
        let second = q.receive(SHORT).await.unwrap().unwrap();
        assert_eq!(second.message, "b");
    }

    #[tokio::test]
    async fn empty_queue_times_out_with_none() {
        let q = fast_queue(3);
        assert!(q.receive(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acked_message_is_gone() {
        let q = fast_queue(3);
        q.send("a").await.unwrap();
        let d = q.receive(SHORT).await.unwrap().unwrap();
        q.ack(&d.receipt).await.unwrap();

        assert!(q.receive(Duration::from_millis(80)).await.unwrap().is_none());
        assert!(matches!(
            q.ack(&d.receipt).await,
            Err(QueueError::UnknownReceipt(_))
        ));
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let q = fast_queue(3);
        q.send("a").await.unwrap();
        let first = q.receive(SHORT).await.unwrap().unwrap();
        assert!(q.receive(SHORT).await.unwrap().is_none());

        let again = q.receive(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(again.message, "a");
        assert_eq!(again.receive_count, 2);
        assert_ne!(again.receipt, first.receipt);

        // The first receipt no longer owns the message.
        assert!(q.ack(&first.receipt).await.is_err());
        q.ack(&again.receipt).await.unwrap();
    }

    #[tokio::test]
    async fn nack_dead_letters_after_max_receives() {
        let q = fast_queue(2);
        q.send("poison").await.unwrap();

        let d1 = q.receive(SHORT).await.unwrap().unwrap();
        q.nack(&d1.receipt).await.unwrap();
        let d2 = q.receive(SHORT).await.unwrap().unwrap();
        assert_eq!(d2.receive_count, 2);
        q.nack(&d2.receipt).await.unwrap();

        assert!(q.receive(SHORT).await.unwrap().is_none());
        assert_eq!(q.dead_letters(), vec!["poison"]);
        assert_eq!(q.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn waiting_receiver_wakes_on_send() {
        let q = Arc::new(fast_queue(3));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.receive(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.send("late").await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.message, "late");
    }
}
