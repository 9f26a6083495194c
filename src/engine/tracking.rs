use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::order::Order;
use crate::models::tracking::{OrderTracking, TrackingRecord};
use crate::state::AppState;

const DEFAULT_STATUS: &str = "active";

#[derive(Debug, Clone, Deserialize)]
pub struct PositionUpdate {
    pub courier_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderPositionUpdate {
    pub order_id: String,
    #[serde(default)]
    pub courier_id: Option<String>,
    #[serde(default)]
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
}

fn validated(latitude: f64, longitude: f64) -> Result<GeoPoint, AppError> {
    let position = GeoPoint {
        lat: latitude,
        lng: longitude,
    };
    if !position.is_valid() {
        return Err(AppError::BadRequest("coordinates are out of range".to_string()));
    }
    Ok(position)
}

fn status_or_default(status: String) -> String {
    if status.trim().is_empty() {
        DEFAULT_STATUS.to_string()
    } else {
        status
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Stores a courier ping. A ping without `order_id` stays attached to the
/// courier's active order, if any.
pub async fn record_position(
    state: &AppState,
    update: PositionUpdate,
) -> Result<TrackingRecord, AppError> {
    if update.courier_id.trim().is_empty() {
        return Err(AppError::BadRequest("courier_id is required".to_string()));
    }
    let position = validated(update.latitude, update.longitude)?;

    let order_id = match non_empty(update.order_id) {
        Some(order_id) => Some(order_id),
        None => state
            .store
            .fetch_courier(&update.courier_id)
            .await?
            .and_then(|courier| courier.active_order_id),
    };

    let record = TrackingRecord {
        courier_id: update.courier_id,
        order_id,
        status: status_or_default(update.status),
        latitude: position.lat,
        longitude: position.lng,
        updated_at: Utc::now(),
    };
    state.store.upsert_tracking(&record).await?;
    broadcast(state, &record);

    Ok(record)
}

pub async fn get_position(state: &AppState, courier_id: &str) -> Result<TrackingRecord, AppError> {
    state
        .store
        .fetch_tracking(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no position recorded for courier {courier_id}")))
}

/// Stores the position of an order. The courier defaults to the one assigned
/// to the order.
pub async fn record_order_position(
    state: &AppState,
    update: OrderPositionUpdate,
) -> Result<OrderTracking, AppError> {
    if update.order_id.trim().is_empty() {
        return Err(AppError::BadRequest("order_id is required".to_string()));
    }
    let position = validated(update.latitude, update.longitude)?;

    let order = state
        .store
        .fetch_order(&update.order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", update.order_id)))?;
    let courier_id = non_empty(update.courier_id)
        .or(order.courier_id)
        .ok_or_else(|| AppError::BadRequest("courier_id is required".to_string()))?;

    let tracking = OrderTracking {
        order_id: order.id,
        courier_id,
        status: status_or_default(update.status),
        latitude: position.lat,
        longitude: position.lng,
        updated_at: Utc::now(),
    };
    state.store.upsert_order_tracking(&tracking).await?;
    broadcast(state, &TrackingRecord::from(&tracking));

    Ok(tracking)
}

pub async fn get_order_position(state: &AppState, order_id: &str) -> Result<OrderTracking, AppError> {
    state
        .store
        .fetch_order_tracking(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no tracking for order {order_id}")))
}

/// Marks the assigned courier's tracking record with the order. Failures are
/// logged only; the assignment has already been committed.
pub async fn notify_assignment(state: &AppState, order: &Order) {
    let Some(courier_id) = order.courier_id.clone() else {
        return;
    };

    let position = match state.store.fetch_tracking(&courier_id).await {
        Ok(Some(record)) => record.position(),
        Ok(None) => match state.store.fetch_courier(&courier_id).await {
            Ok(Some(courier)) => courier.position(),
            Ok(None) => GeoPoint { lat: 0.0, lng: 0.0 },
            Err(err) => {
                warn!(courier_id = %courier_id, error = %err, "tracking update skipped");
                return;
            }
        },
        Err(err) => {
            warn!(courier_id = %courier_id, error = %err, "tracking update skipped");
            return;
        }
    };

    let record = TrackingRecord {
        courier_id,
        order_id: Some(order.id.clone()),
        status: "assigned".to_string(),
        latitude: position.lat,
        longitude: position.lng,
        updated_at: Utc::now(),
    };
    match state.store.upsert_tracking(&record).await {
        Ok(()) => broadcast(state, &record),
        Err(err) => {
            warn!(courier_id = %record.courier_id, order_id = %order.id, error = %err, "tracking update failed")
        }
    }
}

fn broadcast(state: &AppState, record: &TrackingRecord) {
    // No subscribers is not an error.
    let receivers = state.tracking_tx.send(record.clone()).unwrap_or(0);
    debug!(courier_id = %record.courier_id, receivers, "position broadcast");
}
