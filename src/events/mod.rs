pub mod bus;
pub mod pg_queue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::Order;

pub const SCHEMA_VERSION: u16 = 1;

pub const ORDER_CREATED_QUEUE: &str = "order_created";
pub const ORDER_COMPLETED_QUEUE: &str = "order_completed";
pub const COURIER_CREATED_QUEUE: &str = "courier_created";
pub const DELIVERY_CALCULATED_QUEUE: &str = "delivery_calculated";
pub const NOTIFICATIONS_QUEUE: &str = "notifications";

/// Queues consumed by the analytics projection.
pub const ANALYTICS_QUEUES: [&str; 4] = [
    ORDER_CREATED_QUEUE,
    ORDER_COMPLETED_QUEUE,
    COURIER_CREATED_QUEUE,
    DELIVERY_CALCULATED_QUEUE,
];

/// Status sentinels carried on the wire by existing consumers.
pub const STATUS_NEW: &str = "новый";
pub const STATUS_DONE: &str = "завершён";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    OrderCompleted {
        order_id: String,
        #[serde(default)]
        courier_id: Option<String>,
        #[serde(default)]
        created_at: Option<String>,
        #[serde(default)]
        completed_at: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    CourierCreated {
        courier_id: String,
        #[serde(default)]
        courier_name: String,
    },
    DeliveryCalculated {
        #[serde(default)]
        order_id: String,
        #[serde(default)]
        courier_id: Option<String>,
        #[serde(default)]
        cost: Option<f64>,
    },
}

impl Event {
    pub fn order_created(order: &Order) -> Self {
        Event::OrderCreated {
            order_id: order.id.clone(),
            status: Some(STATUS_NEW.to_string()),
        }
    }

    pub fn order_completed(order: &Order) -> Self {
        Event::OrderCompleted {
            order_id: order.id.clone(),
            courier_id: order.courier_id.clone(),
            created_at: Some(order.created_at.to_rfc3339()),
            completed_at: order.completed_at.map(|at| at.to_rfc3339()),
            status: Some(STATUS_DONE.to_string()),
        }
    }

    pub fn queue(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => ORDER_CREATED_QUEUE,
            Event::OrderCompleted { .. } => ORDER_COMPLETED_QUEUE,
            Event::CourierCreated { .. } => COURIER_CREATED_QUEUE,
            Event::DeliveryCalculated { .. } => DELIVERY_CALCULATED_QUEUE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub schema_version: u16,
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    pub fn new(event: Event) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u16),

    #[error("{found} event delivered on queue {queue}")]
    WrongQueue { queue: String, found: &'static str },
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn decode(queue: &str, payload: &[u8]) -> Result<Envelope, CodecError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;

    if envelope.schema_version == 0 || envelope.schema_version > SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion(envelope.schema_version));
    }

    let found = envelope.event.queue();
    if found != queue {
        return Err(CodecError::WrongQueue {
            queue: queue.to_string(),
            found,
        });
    }

    Ok(envelope)
}

/// A message waiting in the outbox for delivery to `queue`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub queue: String,
    pub payload: Vec<u8>,
}

impl OutboxMessage {
    pub fn event(envelope: &Envelope) -> Result<Self, CodecError> {
        Ok(Self {
            id: envelope.event_id,
            queue: envelope.event.queue().to_string(),
            payload: encode(envelope)?,
        })
    }

    pub fn json<T: Serialize>(queue: &str, body: &T) -> Result<Self, CodecError> {
        Ok(Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload: serde_json::to_vec(body)?,
        })
    }
}

/// A stored outbox row.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub queue: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn pending(message: &OutboxMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: message.id,
            queue: message.queue.clone(),
            payload: message.payload.clone(),
            attempts: 0,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::{decode, encode, CodecError, Envelope, Event, STATUS_NEW};

    #[test]
    fn order_created_carries_wire_fields() {
        let envelope = Envelope::new(Event::OrderCreated {
            order_id: "o-1".to_string(),
            status: Some(STATUS_NEW.to_string()),
        });

        let value: Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value["event"], "order_created");
        assert_eq!(value["order_id"], "o-1");
        assert_eq!(value["status"], "новый");
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["event_id"], envelope.event_id.to_string());
    }

    #[test]
    fn decode_accepts_event_on_its_queue() {
        let id = Uuid::new_v4();
        let payload = json!({
            "schema_version": 1,
            "event_id": id,
            "occurred_at": "2025-05-14T13:05:51Z",
            "event": "delivery_calculated",
            "order_id": "o-1",
            "courier_id": "c1",
            "cost": 12.5
        });

        let envelope = decode("delivery_calculated", payload.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.event_id, id);
        assert_eq!(
            envelope.event,
            Event::DeliveryCalculated {
                order_id: "o-1".to_string(),
                courier_id: Some("c1".to_string()),
                cost: Some(12.5),
            }
        );
    }

    #[test]
    fn decode_rejects_event_on_foreign_queue() {
        let envelope = Envelope::new(Event::CourierCreated {
            courier_id: "c1".to_string(),
            courier_name: "Ivan".to_string(),
        });
        let bytes = encode(&envelope).unwrap();

        let err = decode("order_created", &bytes).unwrap_err();
        assert!(matches!(err, CodecError::WrongQueue { found: "courier_created", .. }));
    }

    #[test]
    fn decode_rejects_future_schema() {
        let mut envelope = Envelope::new(Event::CourierCreated {
            courier_id: "c1".to_string(),
            courier_name: String::new(),
        });
        envelope.schema_version = 7;
        let bytes = encode(&envelope).unwrap();

        let err = decode("courier_created", &bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(7)));
    }

    #[test]
    fn decode_rejects_untagged_map_payload() {
        let payload = json!({ "order_id": "o-1", "status": "новый" });
        let err = decode("order_created", payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
