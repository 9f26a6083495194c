use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CourierStatus {
    #[default]
    Available,
    Busy,
    Offline,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Available => "available",
            CourierStatus::Busy => "busy",
            CourierStatus::Offline => "offline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "available" => Some(CourierStatus::Available),
            "busy" => Some(CourierStatus::Busy),
            "offline" => Some(CourierStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    #[default]
    Foot,
    Bike,
    Car,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Foot => "foot",
            VehicleType::Bike => "bike",
            VehicleType::Car => "car",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "foot" => Some(VehicleType::Foot),
            "bike" => Some(VehicleType::Bike),
            "car" => Some(VehicleType::Car),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub vehicle_type: VehicleType,
    pub status: CourierStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub active_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Courier {
    pub fn position(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}
