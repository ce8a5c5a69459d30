//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! - **Send**: `XADD <stream> * payload <json>`
//! - **Receive**: idle pending entries are reclaimed first (`XPENDING` + `XCLAIM`),
//!   then new entries are read with `XREADGROUP ... >`
//! - **Ack**: `XACK`
//! - **Nack**: the entry stays pending; it is reclaimed once its idle time passes
//!   the visibility timeout
//! - **Dead letters**: entries delivered `max_receive_count` times are copied to
//!   `<stream>:dlq` and acknowledged
//!
//! The receipt of a delivery is the stream entry id.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadOptions,
    StreamReadReply,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use streamlab_queue::{Delivery, QueueConfig, QueueError, Receipt, WorkQueue};

const PAYLOAD_FIELD: &str = "payload";

/// Pending entries inspected per receive when looking for reclaimable work.
const PENDING_SCAN: usize = 16;

#[derive(Debug, Clone)]
pub struct RedisStreamsWorkQueue<M> {
    client: redis::Client,
    stream: String,
    dlq: String,
    group: String,
    consumer: String,
    config: QueueConfig,
    _message: PhantomData<fn() -> M>,
}

fn backend(context: &str, e: redis::RedisError) -> QueueError {
    QueueError::Backend(format!("{context}: {e}"))
}

impl<M> RedisStreamsWorkQueue<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    /// Open a queue on `stream` and make sure the consumer group exists.
    ///
    /// `consumer` must be unique per process sharing the group.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| backend("open", e))?;
        let stream = stream.into();

        let queue = Self {
            client,
            dlq: format!("{stream}:dlq"),
            stream,
            group: group.into(),
            consumer: consumer.into(),
            config,
            _message: PhantomData,
        };
        queue.ensure_group().await?;
        Ok(queue)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn dead_letter_stream(&self) -> &str {
        &self.dlq
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| backend("connect", e))
    }

    /// `XGROUP CREATE ... MKSTREAM`; an existing group is fine.
    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(backend("XGROUP CREATE", e)),
        }
    }

    fn visibility_ms(&self) -> usize {
        usize::try_from(self.config.visibility_timeout.as_millis()).unwrap_or(usize::MAX)
    }

    fn decode(entry: &StreamId) -> Result<M, QueueError> {
        let payload: String = entry.get(PAYLOAD_FIELD).ok_or_else(|| {
            QueueError::Serialization(format!("entry {} has no payload field", entry.id))
        })?;
        serde_json::from_str(&payload).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Copy an entry to the dead-letter stream and acknowledge the original.
    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
        receive_count: usize,
    ) -> Result<(), QueueError> {
        let range: StreamRangeReply = conn
            .xrange(&self.stream, id, id)
            .await
            .map_err(|e| backend("XRANGE", e))?;
        let payload: String = range
            .ids
            .first()
            .and_then(|entry| entry.get(PAYLOAD_FIELD))
            .unwrap_or_default();

        let _: String = conn
            .xadd(
                &self.dlq,
                "*",
                &[
                    (PAYLOAD_FIELD, payload),
                    ("original_id", id.to_string()),
                    ("receive_count", receive_count.to_string()),
                    ("failed_at", chrono::Utc::now().to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| backend("DLQ XADD", e))?;
        let _: u64 = conn
            .xack(&self.stream, &self.group, &[id])
            .await
            .map_err(|e| backend("XACK", e))?;

        warn!(
            stream = %self.stream,
            entry_id = %id,
            receive_count,
            "message exhausted its receives; dead-lettered"
        );
        Ok(())
    }

    /// Reclaim one pending entry whose visibility timeout has lapsed.
    async fn reclaim(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Option<Delivery<M>>, QueueError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, "-", "+", PENDING_SCAN)
            .await
            .map_err(|e| backend("XPENDING", e))?;

        let min_idle = self.visibility_ms();
        let max = self.config.max_receive_count as usize;

        for entry in pending.ids.iter().filter(|p| p.last_delivered_ms >= min_idle) {
            if entry.times_delivered >= max {
                self.dead_letter(conn, &entry.id, entry.times_delivered).await?;
                continue;
            }

            let claimed: StreamClaimReply = conn
                .xclaim(&self.stream, &self.group, &self.consumer, min_idle, &[&entry.id])
                .await
                .map_err(|e| backend("XCLAIM", e))?;

            // Another consumer may have claimed it first.
            let Some(stream_entry) = claimed.ids.into_iter().next() else {
                continue;
            };

            let receive_count = u32::try_from(entry.times_delivered + 1).unwrap_or(u32::MAX);
            debug!(entry_id = %stream_entry.id, receive_count, "reclaimed idle entry");
            return self.deliver(conn, stream_entry, receive_count).await.map(Some);
        }

        Ok(None)
    }

    async fn deliver(
        &self,
        conn: &mut MultiplexedConnection,
        entry: StreamId,
        receive_count: u32,
    ) -> Result<Delivery<M>, QueueError> {
        match Self::decode(&entry) {
            Ok(message) => Ok(Delivery {
                message,
                receipt: Receipt::new(entry.id),
                receive_count,
            }),
            Err(e) => {
                // Undecodable entries can never succeed.
                self.dead_letter(conn, &entry.id, receive_count as usize).await?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<M> WorkQueue<M> for RedisStreamsWorkQueue<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    #[instrument(skip(self, message), fields(stream = %self.stream), err)]
    async fn send(&self, message: M) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(&message).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.conn().await?;
        let _: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| backend("XADD", e))?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery<M>>, QueueError> {
        let mut conn = self.conn().await?;

        if let Some(delivery) = self.reclaim(&mut conn).await? {
            return Ok(Some(delivery));
        }

        let block_ms = usize::try_from(wait.as_millis()).unwrap_or(usize::MAX).max(1);
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(block_ms);
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await
            .map_err(|e| backend("XREADGROUP", e))?;

        let entry = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next();

        match entry {
            Some(entry) => self.deliver(&mut conn, entry, 1).await.map(Some),
            None => Ok(None),
        }
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let acked: u64 = conn
            .xack(&self.stream, &self.group, &[receipt.as_str()])
            .await
            .map_err(|e| backend("XACK", e))?;
        if acked == 0 {
            return Err(QueueError::UnknownReceipt(receipt.clone()));
        }
        Ok(())
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, receipt.as_str(), receipt.as_str(), 1)
            .await
            .map_err(|e| backend("XPENDING", e))?;

        let Some(entry) = pending.ids.first() else {
            return Err(QueueError::UnknownReceipt(receipt.clone()));
        };

        if entry.times_delivered >= self.config.max_receive_count as usize {
            self.dead_letter(&mut conn, &entry.id, entry.times_delivered)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use streamlab_core::JobId;
    use streamlab_pipeline::{StageMessage, StageName};

    fn entry(id: &str, fields: &[(&str, &str)]) -> StreamId {
        let map: HashMap<String, redis::Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), redis::Value::Data(v.as_bytes().to_vec())))
            .collect();
        StreamId {
            id: id.to_string(),
            map,
        }
    }

    #[test]
    fn decodes_payload_field() {
        let msg = StageMessage::new(StageName::Qc, JobId::new());
        let payload = serde_json::to_string(&msg).unwrap();
        let decoded =
            RedisStreamsWorkQueue::<StageMessage>::decode(&entry("1-0", &[("payload", &payload)]))
                .unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn missing_or_garbled_payload_is_a_serialization_error() {
        let missing = RedisStreamsWorkQueue::<StageMessage>::decode(&entry("1-0", &[]));
        assert!(matches!(missing, Err(QueueError::Serialization(_))));

        let garbled =
            RedisStreamsWorkQueue::<StageMessage>::decode(&entry("1-0", &[("payload", "{")]));
        assert!(matches!(garbled, Err(QueueError::Serialization(_))));
    }

    /// Requires a running Redis at `REDIS_URL`.
    #[tokio::test]
    #[ignore]
    async fn round_trips_through_a_live_stream() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let stream = format!("streamlab:test:{}", JobId::new());
        let queue = RedisStreamsWorkQueue::<StageMessage>::connect(
            url,
            stream,
            "test-group",
            "test-consumer",
            QueueConfig::default(),
        )
        .await
        .unwrap();

        let msg = StageMessage::first(JobId::new());
        queue.send(msg).await.unwrap();
        let delivery = queue
            .receive(Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message, msg);
        assert_eq!(delivery.receive_count, 1);
        queue.ack(&delivery.receipt).await.unwrap();
        assert!(queue.ack(&delivery.receipt).await.is_err());
    }
}
