use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{Envelope, Event, OutboxMessage};
use crate::models::courier::{Courier, CourierStatus, GeoPoint, VehicleType};
use crate::models::tracking::TrackingRecord;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCourier {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

pub async fn register_courier(state: &AppState, new_courier: NewCourier) -> Result<Courier, AppError> {
    let name = new_courier.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("courier name is required".to_string()));
    }

    let position = GeoPoint {
        lat: new_courier.latitude,
        lng: new_courier.longitude,
    };
    if !position.is_valid() {
        return Err(AppError::BadRequest(
            "courier coordinates are out of range".to_string(),
        ));
    }

    let courier = Courier {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        phone: new_courier.phone,
        vehicle_type: new_courier.vehicle_type,
        status: CourierStatus::Available,
        latitude: position.lat,
        longitude: position.lng,
        active_order_id: None,
        created_at: Utc::now(),
    };

    let created = OutboxMessage::event(&Envelope::new(Event::CourierCreated {
        courier_id: courier.id.clone(),
        courier_name: courier.name.clone(),
    }))?;
    state.store.create_courier(&courier, &[created]).await?;

    let seed = TrackingRecord {
        courier_id: courier.id.clone(),
        order_id: None,
        status: courier.status.as_str().to_string(),
        latitude: courier.latitude,
        longitude: courier.longitude,
        updated_at: courier.created_at,
    };
    if let Err(err) = state.store.upsert_tracking(&seed).await {
        warn!(courier_id = %courier.id, error = %err, "failed to seed tracking record");
    }

    info!(courier_id = %courier.id, vehicle = courier.vehicle_type.as_str(), "courier registered");
    Ok(courier)
}

pub async fn get_courier(state: &AppState, courier_id: &str) -> Result<Courier, AppError> {
    state
        .store
        .fetch_courier(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))
}

pub async fn list_couriers(state: &AppState) -> Result<Vec<Courier>, AppError> {
    Ok(state.store.list_couriers().await?)
}
