use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::courier::GeoPoint;

/// Latest known position of a courier, one record per courier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingRecord {
    pub courier_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl TrackingRecord {
    pub fn position(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }

    pub fn for_order(&self) -> Option<OrderTracking> {
        self.order_id.as_ref().map(|order_id| OrderTracking {
            order_id: order_id.clone(),
            courier_id: self.courier_id.clone(),
            status: self.status.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            updated_at: self.updated_at,
        })
    }
}

/// Latest known position of an order in delivery, one record per order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderTracking {
    pub order_id: String,
    pub courier_id: String,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<&OrderTracking> for TrackingRecord {
    fn from(tracking: &OrderTracking) -> Self {
        TrackingRecord {
            courier_id: tracking.courier_id.clone(),
            order_id: Some(tracking.order_id.clone()),
            status: tracking.status.clone(),
            latitude: tracking.latitude,
            longitude: tracking.longitude,
            updated_at: tracking.updated_at,
        }
    }
}
