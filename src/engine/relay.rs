use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::events::OutboxRecord;
use crate::state::AppState;
use crate::store::StoreError;

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Delay before the next attempt once `attempts` deliveries have failed.
pub fn backoff(attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.saturating_sub(1).min(16));
    BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
}

pub async fn run_outbox_relay(state: Arc<AppState>, config: RelayConfig) {
    info!(
        bus = state.bus.name(),
        poll_ms = config.poll_interval.as_millis() as u64,
        "outbox relay started"
    );

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = relay_once(&state, &config).await {
            warn!(error = %err, "outbox relay pass failed");
        }
    }
}

/// Publishes every due row once. Returns how many were delivered.
pub async fn relay_once(state: &AppState, config: &RelayConfig) -> Result<usize, StoreError> {
    let due = state.store.due_outbox(Utc::now(), config.batch_size).await?;
    let mut delivered = 0;

    for record in due {
        match publish(state, &record, config.publish_timeout).await {
            Ok(()) => {
                state.store.mark_delivered(record.id).await?;
                state.metrics.published(&record.queue, "ok");
                debug!(message_id = %record.id, queue = %record.queue, "outbox message delivered");
                delivered += 1;
            }
            Err(reason) => {
                let attempts = record.attempts + 1;
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(backoff(attempts))
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                state
                    .store
                    .mark_failed(record.id, &reason, retry_at)
                    .await?;
                state.metrics.published(&record.queue, "error");
                warn!(
                    message_id = %record.id,
                    queue = %record.queue,
                    attempts,
                    error = %reason,
                    "outbox delivery failed; will retry"
                );
            }
        }
    }

    let backlog = state.store.outbox_backlog().await?;
    state
        .metrics
        .outbox_backlog
        .set(i64::try_from(backlog).unwrap_or(i64::MAX));

    Ok(delivered)
}

async fn publish(state: &AppState, record: &OutboxRecord, limit: Duration) -> Result<(), String> {
    match timeout(limit, state.bus.publish(&record.queue, record.payload.clone())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("publish timed out after {}ms", limit.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use super::{backoff, relay_once};
    use crate::config::RelayConfig;
    use crate::engine::pricing::PricingConfig;
    use crate::events::bus::{ChannelBus, EventBus};
    use crate::events::OutboxMessage;
    use crate::state::AppState;
    use crate::store::MemoryStore;

    fn config() -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            publish_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(2));
        assert_eq!(backoff(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn undeclared_queue_is_retried_after_backoff() {
        let bus = Arc::new(ChannelBus::new(8));
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            bus.clone(),
            PricingConfig::default(),
            8,
        );
        let message = OutboxMessage::json("notifications", &"hello").unwrap();
        state.store.enqueue(&[message.clone()]).await.unwrap();

        assert_eq!(relay_once(&state, &config()).await.unwrap(), 0);
        assert_eq!(state.store.outbox_backlog().await.unwrap(), 1);
        // Not due again until the backoff elapses.
        assert!(state.store.due_outbox(Utc::now(), 10).await.unwrap().is_empty());

        let mut consumer = bus.subscribe("notifications").await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(5);
        let due = state.store.due_outbox(later, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
        assert!(due[0].last_error.is_some());

        bus.publish(&due[0].queue, due[0].payload.clone()).await.unwrap();
        let delivery = consumer.recv().await.unwrap().unwrap();
        assert_eq!(delivery.payload, message.payload);
    }

    #[tokio::test]
    async fn delivered_rows_leave_the_backlog() {
        let bus = Arc::new(ChannelBus::new(8));
        let mut consumer = bus.subscribe("notifications").await.unwrap();
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            bus.clone(),
            PricingConfig::default(),
            8,
        );
        state
            .store
            .enqueue(&[OutboxMessage::json("notifications", &"hi").unwrap()])
            .await
            .unwrap();

        assert_eq!(relay_once(&state, &config()).await.unwrap(), 1);
        assert_eq!(state.store.outbox_backlog().await.unwrap(), 0);
        assert!(consumer.recv().await.unwrap().is_some());
        assert_eq!(relay_once(&state, &config()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn published_rows_are_removed() {
        let bus = Arc::new(ChannelBus::new(256));
        let _consumer = bus.subscribe("notifications").await.unwrap();
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            bus.clone(),
            PricingConfig::default(),
            8,
        );
        let messages: Vec<OutboxMessage> = (0..200)
            .map(|n| OutboxMessage::json("notifications", &n).unwrap())
            .collect();
        state.store.enqueue(&messages).await.unwrap();

        let config = RelayConfig {
            batch_size: 100,
            ..config()
        };
        assert_eq!(relay_once(&state, &config).await.unwrap(), 100);
        assert_eq!(state.store.outbox_backlog().await.unwrap(), 100);
        assert_eq!(relay_once(&state, &config).await.unwrap(), 100);

        assert_eq!(state.store.outbox_backlog().await.unwrap(), 0);
        let far_future = Utc::now() + chrono::Duration::days(365);
        assert!(state.store.due_outbox(far_future, 1000).await.unwrap().is_empty());
        assert_eq!(state.metrics.outbox_backlog.get(), 0);
    }
}
