use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::tracking;
use crate::error::AppError;
use crate::events::{CodecError, Envelope, Event, OutboxMessage, NOTIFICATIONS_QUEUE};
use crate::models::notification::NotificationMessage;
use crate::models::order::{Order, OrderStatus, Parcel, Urgency};
use crate::state::AppState;

pub const ORDER_COMPLETED_NOTIFICATION: &str = "order_completed";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub recipient_name: String,
    #[serde(default)]
    pub address_from: String,
    #[serde(default)]
    pub address_to: String,
    #[serde(flatten)]
    pub parcel: Parcel,
    #[serde(default)]
    pub urgency: Urgency,
}

pub async fn create_order(state: &AppState, new_order: NewOrder) -> Result<Order, AppError> {
    if let Some(attribute) = new_order.parcel.invalid_attribute() {
        return Err(AppError::BadRequest(format!(
            "{attribute} must be a non-negative number"
        )));
    }

    let order = Order {
        id: Uuid::new_v4().to_string(),
        sender_name: new_order.sender_name,
        recipient_name: new_order.recipient_name,
        address_from: new_order.address_from,
        address_to: new_order.address_to,
        parcel: new_order.parcel,
        urgency: new_order.urgency,
        courier_id: None,
        status: OrderStatus::Created,
        created_at: Utc::now(),
        completed_at: None,
    };

    let created = OutboxMessage::event(&Envelope::new(Event::order_created(&order)))?;
    state.store.create_order(&order, &[created]).await?;
    state.metrics.transition("created");

    info!(order_id = %order.id, urgency = ?order.urgency, "order created");
    Ok(order)
}

/// Binds the order to `courier_id`, or unbinds it when `None` (or empty).
pub async fn assign_courier(
    state: &AppState,
    order_id: &str,
    courier_id: Option<String>,
) -> Result<Order, AppError> {
    let courier_id = courier_id.filter(|id| !id.trim().is_empty());
    let order = state
        .store
        .assign_courier(order_id, courier_id.as_deref())
        .await?;

    match &order.courier_id {
        Some(courier_id) => {
            state.metrics.transition("assigned");
            info!(order_id = %order.id, courier_id = %courier_id, "courier assigned");
            tracking::notify_assignment(state, &order).await;
        }
        None => {
            state.metrics.transition("unassigned");
            info!(order_id = %order.id, "courier unassigned");
        }
    }

    Ok(order)
}

pub async fn complete_order(state: &AppState, order_id: &str) -> Result<Order, AppError> {
    let order = state
        .store
        .complete_order(order_id, Utc::now(), &completion_messages)
        .await?;
    state.metrics.transition("completed");

    info!(
        order_id = %order.id,
        courier_id = ?order.courier_id,
        delivery_seconds = order.delivery_seconds().unwrap_or_default(),
        "order completed"
    );
    Ok(order)
}

/// `order_completed` for analytics and a notification for the recipient.
pub fn completion_messages(order: &Order) -> Result<Vec<OutboxMessage>, CodecError> {
    let completed = OutboxMessage::event(&Envelope::new(Event::order_completed(order)))?;
    let notification = OutboxMessage::json(
        NOTIFICATIONS_QUEUE,
        &NotificationMessage {
            kind: ORDER_COMPLETED_NOTIFICATION.to_string(),
            recipient: order.recipient_name.clone(),
            message: format!("Order {} has been delivered", order.id),
        },
    )?;

    Ok(vec![completed, notification])
}

pub async fn get_order(state: &AppState, order_id: &str) -> Result<Order, AppError> {
    state
        .store
        .fetch_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

pub async fn list_orders(state: &AppState) -> Result<Vec<Order>, AppError> {
    Ok(state.store.list_orders().await?)
}

pub async fn delete_order(state: &AppState, order_id: &str) -> Result<(), AppError> {
    if !state.store.delete_order(order_id).await? {
        return Err(AppError::NotFound(format!("order {order_id} not found")));
    }

    info!(order_id, "order deleted");
    Ok(())
}
