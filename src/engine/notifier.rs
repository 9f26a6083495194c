use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::consumer::{MessageHandler, Outcome};
use crate::error::AppError;
use crate::events::bus::Delivery;
use crate::models::notification::{Notification, NotificationMessage, NotificationStatus};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
#[error("delivery to {recipient} failed: {reason}")]
pub struct SinkError {
    pub recipient: String,
    pub reason: String,
}

/// Outbound channel for notifications (mail, push, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Writes notifications to the log instead of sending them anywhere.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            notification_id = notification.id,
            kind = %notification.kind,
            recipient = %notification.recipient,
            message = %notification.message,
            "notification sent"
        );
        Ok(())
    }
}

pub struct NotificationHandler {
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationHandler {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<Outcome, StoreError> {
        let message: NotificationMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => return Ok(Outcome::Dropped(format!("malformed notification: {err}"))),
        };
        if message.recipient.trim().is_empty() {
            return Ok(Outcome::Dropped("notification without recipient".to_string()));
        }

        let notification = self.store.insert_notification(&message).await?;
        let status = match self.sink.deliver(&notification).await {
            Ok(()) => NotificationStatus::Sent,
            Err(err) => {
                warn!(notification_id = notification.id, error = %err, "notification delivery failed");
                NotificationStatus::Failed
            }
        };
        self.store
            .set_notification_status(notification.id, status)
            .await?;

        Ok(Outcome::Applied)
    }
}

pub async fn list_notifications(store: &dyn Store) -> Result<Vec<Notification>, AppError> {
    Ok(store.list_notifications().await?)
}

pub async fn get_notification(store: &dyn Store, raw_id: &str) -> Result<Notification, AppError> {
    let id: i64 = raw_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid notification id {raw_id:?}")))?;

    store
        .fetch_notification(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("notification {id} not found")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        get_notification, LogSink, NotificationHandler, NotificationSink, SinkError,
    };
    use crate::engine::consumer::{MessageHandler, Outcome};
    use crate::error::AppError;
    use crate::events::bus::Delivery;
    use crate::models::notification::{Notification, NotificationStatus};
    use crate::store::{MemoryStore, Store};

    struct RejectingSink;

    #[async_trait]
    impl NotificationSink for RejectingSink {
        async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
            Err(SinkError {
                recipient: notification.recipient.clone(),
                reason: "mailbox full".into(),
            })
        }
    }

    fn delivery(payload: &str) -> Delivery {
        Delivery {
            queue: "notifications".into(),
            receipt: 1,
            payload: payload.as_bytes().to_vec(),
        }
    }

    const MESSAGE: &str = r#"{"type":"order_completed","recipient":"Boris","message":"Order o-1 has been delivered"}"#;

    #[tokio::test]
    async fn delivered_notification_is_marked_sent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let handler = NotificationHandler::new(store.clone(), Arc::new(LogSink));

        let outcome = handler.handle(&delivery(MESSAGE)).await.unwrap();
        assert_eq!(outcome, Outcome::Applied);

        let stored = store.list_notifications().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, NotificationStatus::Sent);
        assert_eq!(stored[0].kind, "order_completed");
    }

    #[tokio::test]
    async fn sink_failure_is_recorded() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let handler = NotificationHandler::new(store.clone(), Arc::new(RejectingSink));

        handler.handle(&delivery(MESSAGE)).await.unwrap();

        let stored = store.fetch_notification(1).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let handler = NotificationHandler::new(store.clone(), Arc::new(LogSink));

        let outcome = handler.handle(&delivery("not json")).await.unwrap();
        assert!(matches!(outcome, Outcome::Dropped(_)));
        assert!(store.list_notifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookup_validates_id() {
        let store = MemoryStore::new();
        assert!(matches!(
            get_notification(&store, "abc").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            get_notification(&store, "42").await,
            Err(AppError::NotFound(_))
        ));
    }
}
