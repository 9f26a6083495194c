use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::events::bus::{BusError, Delivery, EventBus, QueueConsumer};

pub const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    id          BIGSERIAL PRIMARY KEY,
    queue       TEXT NOT NULL,
    payload     BYTEA NOT NULL,
    read_count  INTEGER NOT NULL DEFAULT 0,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    visible_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS queue_messages_visible_idx ON queue_messages (queue, visible_at, id);
"#;

/// A claimed message that is never acked becomes visible again after
/// `visibility_timeout` and is redelivered.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, poll_interval: Duration, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            visibility_timeout,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), BusError> {
        sqlx::raw_sql(QUEUE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for PgQueue {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_messages (queue, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(queue)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        debug!(queue, message_id = id, "message enqueued");
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, BusError> {
        Ok(Box::new(PgQueueConsumer {
            queue: queue.to_string(),
            source: self.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

pub struct PgQueueConsumer {
    queue: String,
    source: PgQueue,
}

impl PgQueueConsumer {
    async fn claim(&self) -> Result<Option<Delivery>, BusError> {
        let visibility_ms = self.source.visibility_timeout.as_millis() as f64;

        let row = sqlx::query(
            r#"
            UPDATE queue_messages
               SET visible_at = now() + make_interval(secs => $2 / 1000.0),
                   read_count = read_count + 1
             WHERE id = (
                   SELECT id FROM queue_messages
                    WHERE queue = $1 AND visible_at <= now()
                    ORDER BY id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED)
            RETURNING id, payload
            "#,
        )
        .bind(&self.queue)
        .bind(visibility_ms)
        .fetch_optional(&self.source.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Delivery {
                queue: self.queue.clone(),
                receipt: row.try_get("id")?,
                payload: row.try_get("payload")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueConsumer for PgQueueConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError> {
        loop {
            if let Some(delivery) = self.claim().await? {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(self.source.poll_interval).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(delivery.receipt)
            .execute(&self.source.pool)
            .await?;
        Ok(())
    }
}
