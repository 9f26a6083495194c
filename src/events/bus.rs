use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no consumer declared for queue {0}")]
    NoConsumer(String),

    #[error("queue {0} already has a consumer")]
    AlreadySubscribed(String),

    #[error("queue {0} is full")]
    Full(String),

    #[error("queue {0} is closed")]
    Closed(String),

    #[error("broker error: {0}")]
    Broker(#[from] sqlx::Error),
}

/// A message handed to a consumer. `receipt` identifies it for [`QueueConsumer::ack`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub receipt: i64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, BusError>;

    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait QueueConsumer: Send {
    /// Waits for the next message. `Ok(None)` means the queue was shut down.
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError>;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError>;
}

/// In-process bus: one bounded channel per queue, one consumer per queue.
pub struct ChannelBus {
    capacity: usize,
    senders: DashMap<String, mpsc::Sender<Vec<u8>>>,
    receivers: DashMap<String, mpsc::Receiver<Vec<u8>>>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: DashMap::new(),
            receivers: DashMap::new(),
        }
    }

    /// Creates the queue so that publishes are buffered before a consumer attaches.
    pub fn declare(&self, queue: &str) {
        if let Entry::Vacant(slot) = self.senders.entry(queue.to_string()) {
            let (tx, rx) = mpsc::channel(self.capacity);
            self.receivers.insert(queue.to_string(), rx);
            slot.insert(tx);
        }
    }
}

#[async_trait]
impl EventBus for ChannelBus {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let sender = self
            .senders
            .get(queue)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BusError::NoConsumer(queue.to_string()))?;

        sender.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => BusError::Full(queue.to_string()),
            mpsc::error::TrySendError::Closed(_) => BusError::Closed(queue.to_string()),
        })
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, BusError> {
        self.declare(queue);

        let (_, rx) = self
            .receivers
            .remove(queue)
            .ok_or_else(|| BusError::AlreadySubscribed(queue.to_string()))?;

        Ok(Box::new(ChannelConsumer {
            queue: queue.to_string(),
            rx,
            next_receipt: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

pub struct ChannelConsumer {
    queue: String,
    rx: mpsc::Receiver<Vec<u8>>,
    next_receipt: i64,
}

#[async_trait]
impl QueueConsumer for ChannelConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError> {
        let Some(payload) = self.rx.recv().await else {
            return Ok(None);
        };
        self.next_receipt += 1;

        Ok(Some(Delivery {
            queue: self.queue.clone(),
            receipt: self.next_receipt,
            payload,
        }))
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BusError, ChannelBus, EventBus};

    #[tokio::test]
    async fn publish_without_declared_queue_fails() {
        let bus = ChannelBus::new(8);
        let err = bus.publish("order_created", b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, BusError::NoConsumer(_)));
    }

    #[tokio::test]
    async fn subscriber_receives_in_publish_order() {
        let bus = ChannelBus::new(8);
        let mut consumer = bus.subscribe("order_created").await.unwrap();

        bus.publish("order_created", b"one".to_vec()).await.unwrap();
        bus.publish("order_created", b"two".to_vec()).await.unwrap();

        let first = consumer.recv().await.unwrap().unwrap();
        let second = consumer.recv().await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.payload, b"two");
        assert!(second.receipt > first.receipt);
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let bus = ChannelBus::new(8);
        let _first = bus.subscribe("notifications").await.unwrap();
        let err = bus.subscribe("notifications").await.err().unwrap();
        assert!(matches!(err, BusError::AlreadySubscribed(_)));
    }

    #[tokio::test]
    async fn full_queue_reports_backpressure() {
        let bus = ChannelBus::new(1);
        bus.declare("courier_created");

        bus.publish("courier_created", b"a".to_vec()).await.unwrap();
        let err = bus.publish("courier_created", b"b".to_vec()).await.unwrap_err();
        assert!(matches!(err, BusError::Full(_)));
    }
}
