use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::events::{OutboxMessage, OutboxRecord};
use crate::models::courier::{Courier, CourierStatus, VehicleType};
use crate::models::notification::{Notification, NotificationMessage, NotificationStatus};
use crate::models::order::{Order, OrderStatus, Parcel, Urgency};
use crate::models::stats::{running_mean, Applied, CourierStats, GeneralStats, OrderReport};
use crate::models::tracking::{OrderTracking, TrackingRecord};
use crate::store::{
    AnalyticsStore, CourierStore, FollowUps, NotificationStore, OrderStore, OutboxStore, Store,
    StoreError, StoreResult, TrackingStore,
};

pub const SCHEMA: &str = include_str!("schema.sql");

const ORDER_COLUMNS: &str = "id, sender_name, recipient_name, address_from, address_to, \
     weight, length, width, height, urgency, courier_id, status, created_at, completed_at";

const COURIER_COLUMNS: &str =
    "id, name, phone, vehicle_type, status, latitude, longitude, active_order_id, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .options([("statement_timeout", config.timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        info!(host = %config.host, database = %config.name, "connected to postgres");
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

#[derive(FromRow)]
struct OrderRow {
    id: String,
    sender_name: String,
    recipient_name: String,
    address_from: String,
    address_to: String,
    weight: f64,
    length: f64,
    width: f64,
    height: f64,
    urgency: i16,
    courier_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("order status {:?}", row.status)))?;
        let urgency = u8::try_from(row.urgency)
            .map(Urgency::from)
            .map_err(|_| StoreError::Corrupt(format!("order urgency {}", row.urgency)))?;

        Ok(Order {
            id: row.id,
            sender_name: row.sender_name,
            recipient_name: row.recipient_name,
            address_from: row.address_from,
            address_to: row.address_to,
            parcel: Parcel {
                weight: row.weight,
                length: row.length,
                width: row.width,
                height: row.height,
            },
            urgency,
            courier_id: row.courier_id,
            status,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct CourierRow {
    id: String,
    name: String,
    phone: String,
    vehicle_type: String,
    status: String,
    latitude: f64,
    longitude: f64,
    active_order_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CourierRow> for Courier {
    type Error = StoreError;

    fn try_from(row: CourierRow) -> Result<Self, Self::Error> {
        Ok(Courier {
            vehicle_type: VehicleType::parse(&row.vehicle_type)
                .ok_or_else(|| StoreError::Corrupt(format!("vehicle type {:?}", row.vehicle_type)))?,
            status: CourierStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("courier status {:?}", row.status)))?,
            id: row.id,
            name: row.name,
            phone: row.phone,
            latitude: row.latitude,
            longitude: row.longitude,
            active_order_id: row.active_order_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: i64,
    kind: String,
    recipient: String,
    message: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            status: NotificationStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("notification status {:?}", row.status)))?,
            id: row.id,
            kind: row.kind,
            recipient: row.recipient,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct OrderTrackingRow {
    order_id: String,
    courier_id: String,
    status: String,
    latitude: f64,
    longitude: f64,
    updated_at: DateTime<Utc>,
}

impl From<OrderTrackingRow> for OrderTracking {
    fn from(row: OrderTrackingRow) -> Self {
        OrderTracking {
            order_id: row.order_id,
            courier_id: row.courier_id,
            status: row.status,
            latitude: row.latitude,
            longitude: row.longitude,
            updated_at: row.updated_at,
        }
    }
}

fn courier_stats_from_row(row: &PgRow) -> StoreResult<CourierStats> {
    Ok(CourierStats {
        courier_id: row.try_get("courier_id")?,
        courier_name: row.try_get("courier_name")?,
        completed_orders: count(row.try_get("completed_orders")?),
        total_revenue: row.try_get("total_revenue")?,
        average_delivery_time_sec: row.try_get("average_delivery_time_sec")?,
    })
}

fn outbox_from_row(row: &PgRow) -> StoreResult<OutboxRecord> {
    let attempts: i32 = row.try_get("attempts")?;
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        queue: row.try_get("queue")?,
        payload: row.try_get("payload")?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
    })
}

async fn insert_outbox(
    messages: &[OutboxMessage],
    now: DateTime<Utc>,
    conn: &mut PgConnection,
) -> StoreResult<()> {
    for message in messages {
        sqlx::query(
            "INSERT INTO outbox (id, queue, payload, created_at, next_attempt_at) \
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(message.id)
        .bind(&message.queue)
        .bind(&message.payload)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_order_tracking(tracking: &OrderTracking, conn: &mut PgConnection) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tracking_info (order_id, courier_id, status, latitude, longitude, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (order_id) DO UPDATE SET
            courier_id = EXCLUDED.courier_id,
            status     = EXCLUDED.status,
            latitude   = EXCLUDED.latitude,
            longitude  = EXCLUDED.longitude,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&tracking.order_id)
    .bind(&tracking.courier_id)
    .bind(&tracking.status)
    .bind(tracking.latitude)
    .bind(tracking.longitude)
    .bind(tracking.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Inserts the event id into the ledger; `false` when it was already there.
async fn first_application(event_id: Uuid, kind: &str, conn: &mut PgConnection) -> StoreResult<bool> {
    let result = sqlx::query(
        "INSERT INTO applied_events (event_id, event_type) VALUES ($1, $2) ON CONFLICT (event_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(kind)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn fetch_order_for_update(id: &str, conn: &mut PgConnection) -> StoreResult<Order> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    row.ok_or_else(|| StoreError::order_not_found(id))?.try_into()
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order(&self, order: &Order, outbox: &[OutboxMessage]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(&order.id)
        .bind(&order.sender_name)
        .bind(&order.recipient_name)
        .bind(&order.address_from)
        .bind(&order.address_to)
        .bind(order.parcel.weight)
        .bind(order.parcel.length)
        .bind(order.parcel.width)
        .bind(order.parcel.height)
        .bind(u8::from(order.urgency) as i16)
        .bind(&order.courier_id)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.completed_at)
        .execute(&mut *tx)
        .await?;
        insert_outbox(outbox, order.created_at, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_order(&self, id: &str) -> StoreResult<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Order::try_from).transpose()
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let rows: Vec<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at, id"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn delete_order(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("UPDATE couriers SET active_order_id = NULL WHERE active_order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn assign_courier(&self, id: &str, courier_id: Option<&str>) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;
        let order = fetch_order_for_update(id, &mut tx).await?;
        if order.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                order_id: id.to_string(),
                status: order.status,
                action: "assigned",
            });
        }

        if let Some(courier_id) = courier_id {
            let active: Option<Option<String>> = sqlx::query_scalar(
                "SELECT active_order_id FROM couriers WHERE id = $1 FOR UPDATE",
            )
            .bind(courier_id)
            .fetch_optional(&mut *tx)
            .await?;
            match active {
                None => return Err(StoreError::courier_not_found(courier_id)),
                Some(Some(active)) if active != id => {
                    return Err(StoreError::CourierBusy {
                        courier_id: courier_id.to_string(),
                        active_order_id: active,
                    });
                }
                Some(_) => {}
            }
        }

        sqlx::query("UPDATE couriers SET active_order_id = NULL WHERE active_order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let status = match courier_id {
            Some(courier_id) => {
                sqlx::query("UPDATE couriers SET active_order_id = $1 WHERE id = $2")
                    .bind(id)
                    .bind(courier_id)
                    .execute(&mut *tx)
                    .await?;
                OrderStatus::Assigned
            }
            None => OrderStatus::Created,
        };

        let row: OrderRow = sqlx::query_as(&format!(
            "UPDATE orders SET courier_id = $1, status = $2 WHERE id = $3 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(courier_id)
        .bind(status.as_str())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn complete_order(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        follow_ups: FollowUps<'_>,
    ) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;
        let current = fetch_order_for_update(id, &mut tx).await?;
        if current.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                order_id: id.to_string(),
                status: current.status,
                action: "completed",
            });
        }

        let completed_at = completed_at.max(current.created_at);
        let row: OrderRow = sqlx::query_as(&format!(
            "UPDATE orders SET status = $1, completed_at = $2 WHERE id = $3 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(OrderStatus::Completed.as_str())
        .bind(completed_at)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let completed = Order::try_from(row)?;

        sqlx::query("UPDATE couriers SET active_order_id = NULL WHERE active_order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let messages = follow_ups(&completed)?;
        insert_outbox(&messages, completed_at, &mut tx).await?;
        tx.commit().await?;

        Ok(completed)
    }
}

#[async_trait]
impl CourierStore for PgStore {
    async fn create_courier(&self, courier: &Courier, outbox: &[OutboxMessage]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO couriers ({COURIER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&courier.id)
        .bind(&courier.name)
        .bind(&courier.phone)
        .bind(courier.vehicle_type.as_str())
        .bind(courier.status.as_str())
        .bind(courier.latitude)
        .bind(courier.longitude)
        .bind(&courier.active_order_id)
        .bind(courier.created_at)
        .execute(&mut *tx)
        .await?;
        insert_outbox(outbox, courier.created_at, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_courier(&self, id: &str) -> StoreResult<Option<Courier>> {
        let row: Option<CourierRow> =
            sqlx::query_as(&format!("SELECT {COURIER_COLUMNS} FROM couriers WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Courier::try_from).transpose()
    }

    async fn list_couriers(&self) -> StoreResult<Vec<Courier>> {
        let rows: Vec<CourierRow> =
            sqlx::query_as(&format!("SELECT {COURIER_COLUMNS} FROM couriers ORDER BY created_at, id"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Courier::try_from).collect()
    }
}

#[async_trait]
impl TrackingStore for PgStore {
    async fn upsert_tracking(&self, record: &TrackingRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO courier_tracking (courier_id, order_id, status, latitude, longitude, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (courier_id) DO UPDATE SET
                order_id   = EXCLUDED.order_id,
                status     = EXCLUDED.status,
                latitude   = EXCLUDED.latitude,
                longitude  = EXCLUDED.longitude,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.courier_id)
        .bind(&record.order_id)
        .bind(&record.status)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE couriers SET latitude = $1, longitude = $2 WHERE id = $3")
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(&record.courier_id)
            .execute(&mut *tx)
            .await?;
        if let Some(tracking) = record.for_order() {
            upsert_order_tracking(&tracking, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_tracking(&self, courier_id: &str) -> StoreResult<Option<TrackingRecord>> {
        let row = sqlx::query(
            "SELECT courier_id, order_id, status, latitude, longitude, updated_at \
             FROM courier_tracking WHERE courier_id = $1",
        )
        .bind(courier_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StoreResult<TrackingRecord> {
            Ok(TrackingRecord {
                courier_id: row.try_get("courier_id")?,
                order_id: row.try_get("order_id")?,
                status: row.try_get("status")?,
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_order_tracking(&self, tracking: &OrderTracking) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_order_tracking(tracking, &mut conn).await
    }

    async fn fetch_order_tracking(&self, order_id: &str) -> StoreResult<Option<OrderTracking>> {
        let row: Option<OrderTrackingRow> = sqlx::query_as(
            "SELECT order_id, courier_id, status, latitude, longitude, updated_at \
             FROM tracking_info WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(OrderTracking::from))
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue(&self, messages: &[OutboxMessage]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_outbox(messages, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn due_outbox(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            "SELECT id, queue, payload, attempts, last_error, created_at, next_attempt_at \
             FROM outbox WHERE next_attempt_at <= $1 \
             ORDER BY created_at, id LIMIT $2",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM outbox WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, last_error = $1, next_attempt_at = $2 WHERE id = $3",
        )
        .bind(error)
        .bind(retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn outbox_backlog(&self) -> StoreResult<u64> {
        let backlog: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
                .fetch_one(&self.pool)
                .await?;
        Ok(count(backlog))
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn apply_order_created(
        &self,
        event_id: Uuid,
        counts_active: bool,
    ) -> StoreResult<Applied> {
        let mut tx = self.pool.begin().await?;
        if !first_application(event_id, "order_created", &mut tx).await? {
            return Ok(Applied::Duplicate);
        }
        sqlx::query("UPDATE general_stats SET total_orders = total_orders + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        if counts_active {
            sqlx::query("UPDATE general_stats SET active_orders = active_orders + 1 WHERE id = 1")
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Applied::Updated)
    }

    async fn apply_courier_created(
        &self,
        event_id: Uuid,
        courier_id: &str,
        courier_name: &str,
    ) -> StoreResult<Applied> {
        let mut tx = self.pool.begin().await?;
        if !first_application(event_id, "courier_created", &mut tx).await? {
            return Ok(Applied::Duplicate);
        }
        sqlx::query(
            r#"
            INSERT INTO courier_stats (courier_id, courier_name)
            VALUES ($1, $2)
            ON CONFLICT (courier_id) DO UPDATE
               SET courier_name = EXCLUDED.courier_name
             WHERE courier_stats.courier_name = ''
            "#,
        )
        .bind(courier_id)
        .bind(courier_name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Applied::Updated)
    }

    async fn apply_order_completed(
        &self,
        event_id: Uuid,
        courier_id: &str,
        duration_sec: f64,
    ) -> StoreResult<Applied> {
        let mut tx = self.pool.begin().await?;
        if !first_application(event_id, "order_completed", &mut tx).await? {
            return Ok(Applied::Duplicate);
        }

        sqlx::query("INSERT INTO courier_stats (courier_id) VALUES ($1) ON CONFLICT (courier_id) DO NOTHING")
            .bind(courier_id)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query(
            "SELECT completed_orders, average_delivery_time_sec FROM courier_stats \
             WHERE courier_id = $1 FOR UPDATE",
        )
        .bind(courier_id)
        .fetch_one(&mut *tx)
        .await?;
        let completed: i64 = row.try_get("completed_orders")?;
        let average: f64 = row.try_get("average_delivery_time_sec")?;
        let new_average = running_mean(average, count(completed), duration_sec);

        sqlx::query(
            "UPDATE courier_stats SET completed_orders = $1, average_delivery_time_sec = $2 \
             WHERE courier_id = $3",
        )
        .bind(completed + 1)
        .bind(new_average)
        .bind(courier_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE general_stats SET completed_orders = completed_orders + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE general_stats SET active_orders = active_orders - 1 WHERE id = 1 AND active_orders > 0",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Applied::Updated)
    }

    async fn apply_delivery_calculated(
        &self,
        event_id: Uuid,
        courier_id: &str,
        cost: f64,
    ) -> StoreResult<Applied> {
        let mut tx = self.pool.begin().await?;
        if !first_application(event_id, "delivery_calculated", &mut tx).await? {
            return Ok(Applied::Duplicate);
        }
        sqlx::query(
            r#"
            INSERT INTO courier_stats (courier_id, total_revenue)
            VALUES ($1, $2)
            ON CONFLICT (courier_id) DO UPDATE
               SET total_revenue = courier_stats.total_revenue + EXCLUDED.total_revenue
            "#,
        )
        .bind(courier_id)
        .bind(cost)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Applied::Updated)
    }

    async fn general_stats(&self) -> StoreResult<GeneralStats> {
        let row = sqlx::query(
            "SELECT total_orders, active_orders, completed_orders FROM general_stats WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(GeneralStats {
                total_orders: count(row.try_get("total_orders")?),
                active_orders: count(row.try_get("active_orders")?),
                completed_orders: count(row.try_get("completed_orders")?),
            }),
            None => Ok(GeneralStats::default()),
        }
    }

    async fn courier_stats(&self, courier_id: &str) -> StoreResult<Option<CourierStats>> {
        let row = sqlx::query(
            "SELECT courier_id, courier_name, completed_orders, total_revenue, average_delivery_time_sec \
             FROM courier_stats WHERE courier_id = $1",
        )
        .bind(courier_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(courier_stats_from_row).transpose()
    }

    async fn courier_leaderboard(&self) -> StoreResult<Vec<CourierStats>> {
        let rows = sqlx::query(
            "SELECT courier_id, courier_name, completed_orders, total_revenue, average_delivery_time_sec \
             FROM courier_stats ORDER BY total_revenue DESC, courier_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(courier_stats_from_row).collect()
    }

    async fn order_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> StoreResult<OrderReport> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE created_at BETWEEN $1 AND $2) AS total_orders,
                COUNT(*) FILTER (WHERE status <> 'completed' AND created_at BETWEEN $1 AND $2) AS active_orders,
                COUNT(*) FILTER (WHERE status = 'completed' AND completed_at BETWEEN $1 AND $2) AS completed_orders,
                (EXTRACT(EPOCH FROM AVG(completed_at - created_at)
                    FILTER (WHERE status = 'completed' AND completed_at BETWEEN $1 AND $2)))::DOUBLE PRECISION
                    AS average_completion_time_sec
            FROM orders
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        let average: Option<f64> = row.try_get("average_completion_time_sec")?;
        Ok(OrderReport {
            total_orders: count(row.try_get("total_orders")?),
            active_orders: count(row.try_get("active_orders")?),
            completed_orders: count(row.try_get("completed_orders")?),
            average_completion_time_sec: average.unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(&self, message: &NotificationMessage) -> StoreResult<Notification> {
        let row: NotificationRow = sqlx::query_as(
            "INSERT INTO notifications (kind, recipient, message, status, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, kind, recipient, message, status, created_at",
        )
        .bind(&message.kind)
        .bind(&message.recipient)
        .bind(&message.message)
        .bind(NotificationStatus::Pending.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn set_notification_status(&self, id: i64, status: NotificationStatus) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE notifications SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "notification",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_notifications(&self) -> StoreResult<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            "SELECT id, kind, recipient, message, status, created_at \
             FROM notifications ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn fetch_notification(&self, id: i64) -> StoreResult<Option<Notification>> {
        let row: Option<NotificationRow> = sqlx::query_as(
            "SELECT id, kind, recipient, message, status, created_at FROM notifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Notification::try_from).transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
