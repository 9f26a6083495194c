use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::events::bus::{Delivery, QueueConsumer};
use crate::state::AppState;
use crate::store::StoreError;

/// What a handler did with one message. Every outcome is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    Duplicate,
    Dropped(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Duplicate => "duplicate",
            Outcome::Dropped(_) => "dropped",
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// A store error leaves the message unacknowledged for redelivery.
    async fn handle(&self, delivery: &Delivery) -> Result<Outcome, StoreError>;
}

/// Processes one message at a time from `consumer` until the queue closes.
pub async fn run_consumer(
    state: Arc<AppState>,
    queue: &'static str,
    mut consumer: Box<dyn QueueConsumer>,
    handler: Arc<dyn MessageHandler>,
    handle_timeout: Duration,
) {
    info!(queue, "consumer started");

    loop {
        let delivery = match consumer.recv().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(err) => {
                error!(queue, error = %err, "failed to receive message");
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let timer = state
            .metrics
            .event_handling_seconds
            .with_label_values(&[queue])
            .start_timer();
        let result = timeout(handle_timeout, handler.handle(&delivery)).await;
        timer.observe_duration();

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                state.metrics.consumed(queue, "failed");
                error!(queue, receipt = delivery.receipt, error = %err, "message handling failed");
                continue;
            }
            Err(_) => {
                state.metrics.consumed(queue, "timeout");
                error!(queue, receipt = delivery.receipt, "message handling timed out");
                continue;
            }
        };

        state.metrics.consumed(queue, outcome.label());
        match &outcome {
            Outcome::Dropped(reason) => {
                warn!(queue, receipt = delivery.receipt, reason = %reason, "message dropped")
            }
            Outcome::Duplicate => debug!(queue, receipt = delivery.receipt, "duplicate message"),
            Outcome::Applied => debug!(queue, receipt = delivery.receipt, "message applied"),
        }

        if let Err(err) = consumer.ack(&delivery).await {
            error!(queue, receipt = delivery.receipt, error = %err, "failed to acknowledge message");
        }
    }

    warn!(queue, "consumer stopped: queue closed");
}
