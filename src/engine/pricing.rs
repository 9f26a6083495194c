use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{Envelope, Event, OutboxMessage};
use crate::geo::{haversine_km, volume_m3};
use crate::models::courier::GeoPoint;
use crate::models::order::{Parcel, Urgency};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub struct PricingConfig {
    pub base_fee: f64,
    pub distance_rate: f64,
    pub weight_rate: f64,
    pub volume_rate: f64,
    pub urgency_factor: f64,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fee: 50.0,
            distance_rate: 5.0,
            weight_rate: 2.0,
            volume_rate: 3.0,
            urgency_factor: 1.5,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("{0} coordinates are out of range")]
    InvalidCoordinates(&'static str),

    #[error("{0} must be a non-negative number")]
    InvalidAttribute(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryRequest {
    #[serde(default)]
    pub from_lat: f64,
    #[serde(default)]
    pub from_lng: f64,
    #[serde(default)]
    pub to_lat: f64,
    #[serde(default)]
    pub to_lng: f64,
    #[serde(flatten)]
    pub parcel: Parcel,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub courier_id: Option<String>,
}

impl DeliveryRequest {
    fn from(&self) -> GeoPoint {
        GeoPoint {
            lat: self.from_lat,
            lng: self.from_lng,
        }
    }

    fn to(&self) -> GeoPoint {
        GeoPoint {
            lat: self.to_lat,
            lng: self.to_lng,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Quote {
    pub estimated_cost: f64,
    pub currency: String,
}

pub fn estimate_cost(config: &PricingConfig, request: &DeliveryRequest) -> Result<f64, PricingError> {
    let (from, to) = (request.from(), request.to());
    if !from.is_valid() {
        return Err(PricingError::InvalidCoordinates("origin"));
    }
    if !to.is_valid() {
        return Err(PricingError::InvalidCoordinates("destination"));
    }
    if let Some(attribute) = request.parcel.invalid_attribute() {
        return Err(PricingError::InvalidAttribute(attribute));
    }

    let parcel = &request.parcel;
    let distance = haversine_km(from, to);
    let volume = volume_m3(parcel.length, parcel.width, parcel.height);

    let mut cost = config.base_fee
        + distance * config.distance_rate
        + parcel.weight * config.weight_rate
        + volume * config.volume_rate;
    if request.urgency == Urgency::Express {
        cost *= config.urgency_factor;
    }

    Ok(cost)
}

/// Prices the request and, when it names an order, queues a
/// `delivery_calculated` event. Queueing failures never reach the caller.
pub async fn quote(state: &AppState, request: &DeliveryRequest) -> Result<Quote, PricingError> {
    let cost = estimate_cost(&state.pricing, request)?;

    if let Some(order_id) = request.order_id.as_deref().filter(|id| !id.is_empty()) {
        let event = Event::DeliveryCalculated {
            order_id: order_id.to_string(),
            courier_id: request.courier_id.clone().filter(|id| !id.is_empty()),
            cost: Some(cost),
        };

        let queued = match OutboxMessage::event(&Envelope::new(event)) {
            Ok(message) => state
                .store
                .enqueue(&[message])
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match queued {
            Ok(()) => debug!(order_id, cost, "delivery_calculated queued"),
            Err(err) => warn!(order_id, error = %err, "failed to queue delivery_calculated"),
        }
    }

    Ok(Quote {
        estimated_cost: cost,
        currency: state.pricing.currency.clone(),
    })
}
