use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::events::{OutboxMessage, OutboxRecord};
use crate::models::courier::Courier;
use crate::models::notification::{Notification, NotificationMessage, NotificationStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::stats::{Applied, CourierStats, GeneralStats, OrderReport};
use crate::models::tracking::{OrderTracking, TrackingRecord};
use crate::store::{
    AnalyticsStore, CourierStore, FollowUps, NotificationStore, OrderStore, OutboxStore, Store,
    StoreError, StoreResult, TrackingStore,
};

#[derive(Default)]
struct Tables {
    orders: HashMap<String, Order>,
    couriers: HashMap<String, Courier>,
    tracking: HashMap<String, TrackingRecord>,
    order_tracking: HashMap<String, OrderTracking>,
    /// Undelivered rows only, in insertion order.
    outbox: Vec<OutboxRecord>,
    general: GeneralStats,
    courier_stats: HashMap<String, CourierStats>,
    applied: HashSet<Uuid>,
    notifications: Vec<Notification>,
}

impl Tables {
    fn push_outbox(&mut self, messages: &[OutboxMessage], now: DateTime<Utc>) {
        self.outbox
            .extend(messages.iter().map(|message| OutboxRecord::pending(message, now)));
    }

    /// Records the event id; `false` when it was already applied.
    fn first_application(&mut self, event_id: Uuid) -> bool {
        self.applied.insert(event_id)
    }

    fn courier_stats_entry(&mut self, courier_id: &str) -> &mut CourierStats {
        self.courier_stats
            .entry(courier_id.to_string())
            .or_insert_with(|| CourierStats::empty(courier_id, ""))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: &Order, outbox: &[OutboxMessage]) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        tables.orders.insert(order.id.clone(), order.clone());
        tables.push_outbox(outbox, order.created_at);
        Ok(())
    }

    async fn fetch_order(&self, id: &str) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().orders.get(id).cloned())
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.tables.lock().orders.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn delete_order(&self, id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let removed = tables.orders.remove(id).is_some();
        if removed {
            for courier in tables.couriers.values_mut() {
                if courier.active_order_id.as_deref() == Some(id) {
                    courier.active_order_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn assign_courier(&self, id: &str, courier_id: Option<&str>) -> StoreResult<Order> {
        let mut tables = self.tables.lock();

        let order = tables
            .orders
            .get(id)
            .ok_or_else(|| StoreError::order_not_found(id))?;
        if order.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                order_id: id.to_string(),
                status: order.status,
                action: "assigned",
            });
        }
        let previous = order.courier_id.clone();

        if let Some(courier_id) = courier_id {
            let courier = tables
                .couriers
                .get(courier_id)
                .ok_or_else(|| StoreError::courier_not_found(courier_id))?;
            if let Some(active) = courier.active_order_id.as_deref() {
                if active != id {
                    return Err(StoreError::CourierBusy {
                        courier_id: courier_id.to_string(),
                        active_order_id: active.to_string(),
                    });
                }
            }
        }

        if let Some(previous) = previous.as_deref() {
            if let Some(courier) = tables.couriers.get_mut(previous) {
                if courier.active_order_id.as_deref() == Some(id) {
                    courier.active_order_id = None;
                }
            }
        }
        if let Some(courier_id) = courier_id {
            if let Some(courier) = tables.couriers.get_mut(courier_id) {
                courier.active_order_id = Some(id.to_string());
            }
        }

        let order = tables
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::order_not_found(id))?;
        order.courier_id = courier_id.map(str::to_string);
        order.status = if courier_id.is_some() {
            OrderStatus::Assigned
        } else {
            OrderStatus::Created
        };

        Ok(order.clone())
    }

    async fn complete_order(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        follow_ups: FollowUps<'_>,
    ) -> StoreResult<Order> {
        let mut tables = self.tables.lock();

        let current = tables
            .orders
            .get(id)
            .ok_or_else(|| StoreError::order_not_found(id))?;
        if current.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                order_id: id.to_string(),
                status: current.status,
                action: "completed",
            });
        }

        let mut completed = current.clone();
        completed.status = OrderStatus::Completed;
        completed.completed_at = Some(completed_at.max(completed.created_at));
        let messages = follow_ups(&completed)?;

        if let Some(courier_id) = completed.courier_id.as_deref() {
            if let Some(courier) = tables.couriers.get_mut(courier_id) {
                if courier.active_order_id.as_deref() == Some(id) {
                    courier.active_order_id = None;
                }
            }
        }
        tables.orders.insert(id.to_string(), completed.clone());
        tables.push_outbox(&messages, completed_at);

        Ok(completed)
    }
}

#[async_trait]
impl CourierStore for MemoryStore {
    async fn create_courier(&self, courier: &Courier, outbox: &[OutboxMessage]) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        tables.couriers.insert(courier.id.clone(), courier.clone());
        tables.push_outbox(outbox, courier.created_at);
        Ok(())
    }

    async fn fetch_courier(&self, id: &str) -> StoreResult<Option<Courier>> {
        Ok(self.tables.lock().couriers.get(id).cloned())
    }

    async fn list_couriers(&self) -> StoreResult<Vec<Courier>> {
        let mut couriers: Vec<Courier> = self.tables.lock().couriers.values().cloned().collect();
        couriers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(couriers)
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn upsert_tracking(&self, record: &TrackingRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        if let Some(courier) = tables.couriers.get_mut(&record.courier_id) {
            courier.latitude = record.latitude;
            courier.longitude = record.longitude;
        }
        if let Some(tracking) = record.for_order() {
            tables
                .order_tracking
                .insert(tracking.order_id.clone(), tracking);
        }
        tables
            .tracking
            .insert(record.courier_id.clone(), record.clone());
        Ok(())
    }

    async fn fetch_tracking(&self, courier_id: &str) -> StoreResult<Option<TrackingRecord>> {
        Ok(self.tables.lock().tracking.get(courier_id).cloned())
    }

    async fn upsert_order_tracking(&self, tracking: &OrderTracking) -> StoreResult<()> {
        self.tables
            .lock()
            .order_tracking
            .insert(tracking.order_id.clone(), tracking.clone());
        Ok(())
    }

    async fn fetch_order_tracking(&self, order_id: &str) -> StoreResult<Option<OrderTracking>> {
        Ok(self.tables.lock().order_tracking.get(order_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue(&self, messages: &[OutboxMessage]) -> StoreResult<()> {
        self.tables.lock().push_outbox(messages, Utc::now());
        Ok(())
    }

    async fn due_outbox(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<OutboxRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .outbox
            .iter()
            .filter(|record| record.next_attempt_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: Uuid) -> StoreResult<()> {
        self.tables.lock().outbox.retain(|record| record.id != id);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        if let Some(record) = tables.outbox.iter_mut().find(|record| record.id == id) {
            record.attempts += 1;
            record.last_error = Some(error.to_string());
            record.next_attempt_at = retry_at;
        }
        Ok(())
    }

    async fn outbox_backlog(&self) -> StoreResult<u64> {
        Ok(self.tables.lock().outbox.len() as u64)
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn apply_order_created(
        &self,
        event_id: Uuid,
        counts_active: bool,
    ) -> StoreResult<Applied> {
        let mut tables = self.tables.lock();
        if !tables.first_application(event_id) {
            return Ok(Applied::Duplicate);
        }
        tables.general.total_orders += 1;
        if counts_active {
            tables.general.active_orders += 1;
        }
        Ok(Applied::Updated)
    }

    async fn apply_courier_created(
        &self,
        event_id: Uuid,
        courier_id: &str,
        courier_name: &str,
    ) -> StoreResult<Applied> {
        let mut tables = self.tables.lock();
        if !tables.first_application(event_id) {
            return Ok(Applied::Duplicate);
        }
        let stats = tables.courier_stats_entry(courier_id);
        if stats.courier_name.is_empty() {
            stats.courier_name = courier_name.to_string();
        }
        Ok(Applied::Updated)
    }

    async fn apply_order_completed(
        &self,
        event_id: Uuid,
        courier_id: &str,
        duration_sec: f64,
    ) -> StoreResult<Applied> {
        let mut tables = self.tables.lock();
        if !tables.first_application(event_id) {
            return Ok(Applied::Duplicate);
        }
        tables.courier_stats_entry(courier_id).record_delivery(duration_sec);
        tables.general.completed_orders += 1;
        tables.general.active_orders = tables.general.active_orders.saturating_sub(1);
        Ok(Applied::Updated)
    }

    async fn apply_delivery_calculated(
        &self,
        event_id: Uuid,
        courier_id: &str,
        cost: f64,
    ) -> StoreResult<Applied> {
        let mut tables = self.tables.lock();
        if !tables.first_application(event_id) {
            return Ok(Applied::Duplicate);
        }
        tables.courier_stats_entry(courier_id).total_revenue += cost;
        Ok(Applied::Updated)
    }

    async fn general_stats(&self) -> StoreResult<GeneralStats> {
        Ok(self.tables.lock().general)
    }

    async fn courier_stats(&self, courier_id: &str) -> StoreResult<Option<CourierStats>> {
        Ok(self.tables.lock().courier_stats.get(courier_id).cloned())
    }

    async fn courier_leaderboard(&self) -> StoreResult<Vec<CourierStats>> {
        let mut rows: Vec<CourierStats> =
            self.tables.lock().courier_stats.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.total_revenue
                .total_cmp(&a.total_revenue)
                .then_with(|| a.courier_id.cmp(&b.courier_id))
        });
        Ok(rows)
    }

    async fn order_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> StoreResult<OrderReport> {
        let tables = self.tables.lock();
        let in_window = |at: DateTime<Utc>| at >= from && at <= to;

        let mut report = OrderReport::default();
        let mut durations = Vec::new();

        for order in tables.orders.values() {
            if in_window(order.created_at) {
                report.total_orders += 1;
                if order.status != OrderStatus::Completed {
                    report.active_orders += 1;
                }
            }
            if order.status == OrderStatus::Completed {
                if let Some(done) = order.completed_at.filter(|done| in_window(*done)) {
                    report.completed_orders += 1;
                    durations.push((done - order.created_at).num_milliseconds() as f64 / 1000.0);
                }
            }
        }

        if !durations.is_empty() {
            report.average_completion_time_sec =
                durations.iter().sum::<f64>() / durations.len() as f64;
        }
        Ok(report)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, message: &NotificationMessage) -> StoreResult<Notification> {
        let mut tables = self.tables.lock();
        let notification = Notification {
            id: tables.notifications.len() as i64 + 1,
            kind: message.kind.clone(),
            recipient: message.recipient.clone(),
            message: message.message.clone(),
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
        };
        tables.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn set_notification_status(&self, id: i64, status: NotificationStatus) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let notification = tables
            .notifications
            .iter_mut()
            .find(|notification| notification.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "notification",
                id: id.to_string(),
            })?;
        notification.status = status;
        Ok(())
    }

    async fn list_notifications(&self) -> StoreResult<Vec<Notification>> {
        Ok(self.tables.lock().notifications.iter().rev().cloned().collect())
    }

    async fn fetch_notification(&self, id: i64) -> StoreResult<Option<Notification>> {
        Ok(self
            .tables
            .lock()
            .notifications
            .iter()
            .find(|notification| notification.id == id)
            .cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
