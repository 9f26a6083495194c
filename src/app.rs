use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, RelayConfig};
use crate::engine::analytics::AnalyticsHandler;
use crate::engine::consumer::{run_consumer, MessageHandler};
use crate::engine::notifier::{NotificationHandler, NotificationSink};
use crate::engine::relay::run_outbox_relay;
use crate::error::AppError;
use crate::events::bus::{BusError, ChannelBus, EventBus};
use crate::events::pg_queue::PgQueue;
use crate::events::{ANALYTICS_QUEUES, NOTIFICATIONS_QUEUE};
use crate::state::AppState;
use crate::store::{MemoryStore, PgStore, Store};

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn build_store(config: &Config) -> Result<Arc<dyn Store>, AppError> {
    match &config.database {
        Some(database) => {
            let store = PgStore::connect(database).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("DB_HOST not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub async fn build_bus(config: &Config) -> Result<Arc<dyn EventBus>, AppError> {
    match &config.broker_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.as_ref().map_or(5, |db| db.max_connections))
                .acquire_timeout(config.relay.publish_timeout)
                .connect(url)
                .await
                .map_err(BusError::from)?;
            let queue = PgQueue::new(pool, QUEUE_POLL_INTERVAL, config.consume_timeout * 2);
            queue.ensure_schema().await?;
            Ok(Arc::new(queue))
        }
        None => {
            info!(capacity = config.queue_capacity, "BROKER_URL not set; using in-process bus");
            Ok(Arc::new(ChannelBus::new(config.queue_capacity)))
        }
    }
}

/// Subscribes one consumer per queue and starts the outbox relay.
pub async fn spawn_workers(
    state: Arc<AppState>,
    relay: RelayConfig,
    consume_timeout: Duration,
    sink: Arc<dyn NotificationSink>,
) -> Result<Vec<JoinHandle<()>>, AppError> {
    let mut handles = Vec::new();

    let analytics: Arc<dyn MessageHandler> = Arc::new(AnalyticsHandler::new(state.store.clone()));
    for queue in ANALYTICS_QUEUES {
        let consumer = state.bus.subscribe(queue).await?;
        handles.push(tokio::spawn(run_consumer(
            state.clone(),
            queue,
            consumer,
            analytics.clone(),
            consume_timeout,
        )));
    }

    let notifications = state.bus.subscribe(NOTIFICATIONS_QUEUE).await?;
    handles.push(tokio::spawn(run_consumer(
        state.clone(),
        NOTIFICATIONS_QUEUE,
        notifications,
        Arc::new(NotificationHandler::new(state.store.clone(), sink)),
        consume_timeout,
    )));

    handles.push(tokio::spawn(run_outbox_relay(state, relay)));
    Ok(handles)
}
