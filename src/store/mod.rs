pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::events::{CodecError, OutboxMessage, OutboxRecord};
use crate::models::courier::Courier;
use crate::models::notification::{Notification, NotificationMessage, NotificationStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::stats::{Applied, CourierStats, GeneralStats, OrderReport};
use crate::models::tracking::{OrderTracking, TrackingRecord};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Builds the outbox messages for an order from its state after the change.
pub type FollowUps<'a> =
    &'a (dyn Fn(&Order) -> Result<Vec<OutboxMessage>, CodecError> + Send + Sync);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("order {order_id} is {} and cannot be {action}", .status.as_str())]
    InvalidTransition {
        order_id: String,
        status: OrderStatus,
        action: &'static str,
    },

    #[error("courier {courier_id} is already delivering order {active_order_id}")]
    CourierBusy {
        courier_id: String,
        active_order_id: String,
    },

    #[error("invalid stored value: {0}")]
    Corrupt(String),

    #[error("failed to encode outbox message: {0}")]
    Codec(#[from] CodecError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn order_not_found(id: &str) -> Self {
        StoreError::NotFound {
            entity: "order",
            id: id.to_string(),
        }
    }

    pub fn courier_not_found(id: &str) -> Self {
        StoreError::NotFound {
            entity: "courier",
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &Order, outbox: &[OutboxMessage]) -> StoreResult<()>;

    async fn fetch_order(&self, id: &str) -> StoreResult<Option<Order>>;

    async fn list_orders(&self) -> StoreResult<Vec<Order>>;

    /// Returns `false` when no order had that id.
    async fn delete_order(&self, id: &str) -> StoreResult<bool>;

    /// Binds `courier_id` to the order (or unbinds with `None`), moving the
    /// courier's active order reference along with it.
    async fn assign_courier(&self, id: &str, courier_id: Option<&str>) -> StoreResult<Order>;

    async fn complete_order(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        follow_ups: FollowUps<'_>,
    ) -> StoreResult<Order>;
}

#[async_trait]
pub trait CourierStore: Send + Sync {
    async fn create_courier(&self, courier: &Courier, outbox: &[OutboxMessage]) -> StoreResult<()>;

    async fn fetch_courier(&self, id: &str) -> StoreResult<Option<Courier>>;

    async fn list_couriers(&self) -> StoreResult<Vec<Courier>>;
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Upserts the courier's tracking record and mirrors the position onto the
    /// courier row when one exists. A record carrying an order also upserts
    /// that order's tracking.
    async fn upsert_tracking(&self, record: &TrackingRecord) -> StoreResult<()>;

    async fn fetch_tracking(&self, courier_id: &str) -> StoreResult<Option<TrackingRecord>>;

    async fn upsert_order_tracking(&self, tracking: &OrderTracking) -> StoreResult<()>;

    async fn fetch_order_tracking(&self, order_id: &str) -> StoreResult<Option<OrderTracking>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, messages: &[OutboxMessage]) -> StoreResult<()>;

    /// Undelivered rows whose next attempt is due, oldest first.
    async fn due_outbox(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<OutboxRecord>>;

    /// Removes a published row.
    async fn mark_delivered(&self, id: Uuid) -> StoreResult<()>;

    async fn mark_failed(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> StoreResult<()>;

    async fn outbox_backlog(&self) -> StoreResult<u64>;
}

/// Aggregate projection. Each `apply_*` records `event_id` in the applied
/// ledger inside the same transaction and returns [`Applied::Duplicate`]
/// without touching the aggregates when the id was seen before.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn apply_order_created(&self, event_id: Uuid, counts_active: bool)
    -> StoreResult<Applied>;

    async fn apply_courier_created(
        &self,
        event_id: Uuid,
        courier_id: &str,
        courier_name: &str,
    ) -> StoreResult<Applied>;

    async fn apply_order_completed(
        &self,
        event_id: Uuid,
        courier_id: &str,
        duration_sec: f64,
    ) -> StoreResult<Applied>;

    async fn apply_delivery_calculated(
        &self,
        event_id: Uuid,
        courier_id: &str,
        cost: f64,
    ) -> StoreResult<Applied>;

    async fn general_stats(&self) -> StoreResult<GeneralStats>;

    async fn courier_stats(&self, courier_id: &str) -> StoreResult<Option<CourierStats>>;

    /// All courier rows, highest revenue first.
    async fn courier_leaderboard(&self) -> StoreResult<Vec<CourierStats>>;

    async fn order_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> StoreResult<OrderReport>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, message: &NotificationMessage) -> StoreResult<Notification>;

    async fn set_notification_status(&self, id: i64, status: NotificationStatus) -> StoreResult<()>;

    /// Newest first.
    async fn list_notifications(&self) -> StoreResult<Vec<Notification>>;

    async fn fetch_notification(&self, id: i64) -> StoreResult<Option<Notification>>;
}

#[async_trait]
pub trait Store:
    OrderStore + CourierStore + TrackingStore + OutboxStore + AnalyticsStore + NotificationStore
{
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;
}
