//! Redis queue operations implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RedisStreamsQueue;
use crate::queue::error::QueueError;
use crate::queue::traits::{Message, QueueBackend};

impl RedisStreamsQueue {
    /// Create the consumer group for a topic, tolerating prior existence.
    /// MKSTREAM creates the stream if missing, starting at the beginning.
    async fn ensure_group(
        &self,
        conn: &mut (impl redis::aio::ConnectionLike + Send),
        topic: &str,
    ) -> Result<(), QueueError> {
        let res: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.stream_key(topic))
            .arg(self.group_name(topic))
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;
        match res {
            Ok(_) => Ok(()),
            // BUSYGROUP means the group already exists
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move due delayed messages from the ZSET into the stream, at most
    /// `delayed_drain_batch` per call to avoid large bursts.
    async fn drain_delayed(
        &self,
        conn: &mut (impl redis::aio::ConnectionLike + Send),
        topic: &str,
    ) -> Result<(), QueueError> {
        let zkey = self.delayed_key(topic);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&zkey)
            .arg(0i64)
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0usize)
            .arg(self.config().delayed_drain_batch)
            .query_async(conn)
            .await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!(%topic, count = due.len(), "draining delayed messages");
        let stream = self.stream_key(topic);
        let mut pipe = redis::pipe();
        for data in &due {
            pipe.cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("data")
                .arg(data);
            pipe.cmd("ZREM").arg(&zkey).arg(data).ignore();
        }
        let entry_ids: Vec<String> = pipe.query_async(conn).await?;
        // Without an index entry, acking a drained message would be a no-op
        // and it would sit in the group's pending list forever.
        for entry_id in &entry_ids {
            self.index_job(&mut *conn, entry_id, topic).await?;
        }
        Ok(())
    }

    /// Append serialized message data to a topic stream, honoring the
    /// configured approximate length cap.
    async fn append(
        &self,
        conn: &mut (impl redis::aio::ConnectionLike + Send),
        topic: &str,
        data: &str,
    ) -> Result<String, QueueError> {
        let stream = self.stream_key(topic);
        let entry_id: String = match self.config().stream_maxlen {
            Some(maxlen) => {
                conn.xadd_maxlen(&stream, StreamMaxlen::Approx(maxlen), "*", &[("data", data)])
                    .await?
            }
            None => conn.xadd(&stream, "*", &[("data", data)]).await?,
        };
        Ok(entry_id)
    }

    /// Record the topic/group of an entry so `ack` can resolve the stream
    /// from the job id alone.
    async fn index_job(
        &self,
        conn: &mut (impl redis::aio::ConnectionLike + Send),
        entry_id: &str,
        topic: &str,
    ) -> Result<(), QueueError> {
        let group = self.group_name(topic);
        let _: () = conn
            .hset_multiple(
                self.job_index_key(entry_id),
                &[("topic", topic), ("group", group.as_str())],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisStreamsQueue {
    async fn enqueue(&self, topic: &str, mut message: Message) -> Result<String, QueueError> {
        let mut conn = self.conn().await?;
        self.ensure_group(&mut *conn, topic).await?;

        // Ensure a job_id exists inside the document; the stream entry id is
        // the authoritative id after delivery.
        message.ensure_job_id();
        let data = serde_json::to_string(&message)?;
        let entry_id = self.append(&mut *conn, topic, &data).await?;
        self.index_job(&mut *conn, &entry_id, topic).await?;
        debug!(%entry_id, %topic, "enqueued message");
        Ok(entry_id)
    }

    async fn dequeue(
        &self,
        topic: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, QueueError> {
        let mut conn = self.conn().await?;
        self.ensure_group(&mut *conn, topic).await?;
        self.drain_delayed(&mut *conn, topic).await?;

        let mut opts = StreamReadOptions::default()
            .group(self.group_name(topic), self.config().consumer.clone())
            .count(1);
        match timeout {
            // BLOCK 0 waits indefinitely
            None => opts = opts.block(0),
            Some(t) if t > Duration::ZERO => opts = opts.block(t.as_millis() as usize),
            // zero timeout: no BLOCK, return immediately
            Some(_) => {}
        }

        let stream = self.stream_key(topic);
        let reply: StreamReadReply = conn
            .xread_options(&[stream.as_str()], &[">"], &opts)
            .await?;

        let entry = match reply
            .keys
            .into_iter()
            .next()
            .and_then(|k| k.ids.into_iter().next())
        {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let data: Option<String> = entry.get("data");
        let mut message: Message = match data {
            Some(ref raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!(entry_id = %entry.id, error = %e, "malformed stream entry, wrapping raw");
                Message::new(topic, json!({ "raw": raw }))
            }),
            None => Message::new(topic, json!({})),
        };
        // The stream entry id is the delivery-scoped job id.
        message.job_id = Some(entry.id.clone());
        Ok(Some(message))
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let index_key = self.job_index_key(job_id);
        let info: HashMap<String, String> = conn.hgetall(&index_key).await?;
        let (topic, group) = match (info.get("topic"), info.get("group")) {
            (Some(t), Some(g)) => (t.clone(), g.clone()),
            // Unknown or already-acked id: nothing to do.
            _ => return Ok(()),
        };
        let stream = self.stream_key(&topic);
        // Idempotent semantics: tolerate ack/cleanup failures.
        let ack_res: redis::RedisResult<i64> = conn.xack(&stream, &group, &[job_id]).await;
        if let Err(e) = ack_res {
            warn!(%job_id, error = %e, "xack failed; treating as already acked");
            return Ok(());
        }
        let _: redis::RedisResult<i64> = conn.del(&index_key).await;
        Ok(())
    }

    async fn requeue(&self, message: Message, delay: Duration) -> Result<String, QueueError> {
        let topic = message.requeue_topic().to_string();
        // Stream entry ids must not be reused across deliveries.
        let mut message = message;
        message.job_id = None;

        if delay > Duration::ZERO {
            let mut conn = self.conn().await?;
            let data = serde_json::to_string(&message)?;
            let due_ms = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let _: () = conn.zadd(self.delayed_key(&topic), data, due_ms).await?;
            // Parked entries get a synthetic id until they re-enter the stream.
            return Ok(format!("delayed-{}", Uuid::new_v4().simple()));
        }

        self.enqueue(&topic, message).await
    }
}
