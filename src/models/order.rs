use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery priority. On the wire this is the integer class used by the
/// courier clients: `1` is standard, `2` (or anything above) is express.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Urgency {
    #[default]
    Standard,
    Express,
}

impl From<u8> for Urgency {
    fn from(raw: u8) -> Self {
        if raw >= 2 {
            Urgency::Express
        } else {
            Urgency::Standard
        }
    }
}

impl From<Urgency> for u8 {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Standard => 1,
            Urgency::Express => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Assigned,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(OrderStatus::Created),
            "assigned" => Some(OrderStatus::Assigned),
            "completed" => Some(OrderStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == OrderStatus::Completed
    }
}

/// Physical parcel attributes. Metres and kilograms.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Parcel {
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Parcel {
    /// Returns the name of the first attribute that is negative or not finite.
    pub fn invalid_attribute(&self) -> Option<&'static str> {
        [
            ("weight", self.weight),
            ("length", self.length),
            ("width", self.width),
            ("height", self.height),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite() || *value < 0.0)
        .map(|(name, _)| name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub sender_name: String,
    pub recipient_name: String,
    pub address_from: String,
    pub address_to: String,
    #[serde(flatten)]
    pub parcel: Parcel,
    pub urgency: Urgency,
    pub courier_id: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn delivery_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Parcel, Urgency};

    #[test]
    fn urgency_reads_integer_classes() {
        let standard: Urgency = serde_json::from_str("1").unwrap();
        let express: Urgency = serde_json::from_str("2").unwrap();
        let missing: Urgency = serde_json::from_str("0").unwrap();

        assert_eq!(standard, Urgency::Standard);
        assert_eq!(express, Urgency::Express);
        assert_eq!(missing, Urgency::Standard);
        assert_eq!(serde_json::to_string(&Urgency::Express).unwrap(), "2");
    }

    #[test]
    fn parcel_rejects_negative_and_nan() {
        let ok = Parcel {
            weight: 1.0,
            length: 0.0,
            width: 0.2,
            height: 0.3,
        };
        assert_eq!(ok.invalid_attribute(), None);

        let negative = Parcel { width: -0.1, ..ok };
        assert_eq!(negative.invalid_attribute(), Some("width"));

        let nan = Parcel {
            weight: f64::NAN,
            ..ok
        };
        assert_eq!(nan.invalid_attribute(), Some("weight"));
    }
}
