use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::engine::consumer::{MessageHandler, Outcome};
use crate::error::AppError;
use crate::events::bus::Delivery;
use crate::events::{decode, Envelope, Event, STATUS_NEW};
use crate::models::stats::{Applied, CourierStats, GeneralStats, OrderReport};
use crate::store::{AnalyticsStore, Store, StoreError};

pub struct AnalyticsHandler {
    store: Arc<dyn Store>,
}

impl AnalyticsHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for AnalyticsHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<Outcome, StoreError> {
        match decode(&delivery.queue, &delivery.payload) {
            Ok(envelope) => apply_event(&*self.store, &envelope).await,
            Err(err) => Ok(Outcome::Dropped(err.to_string())),
        }
    }
}

pub async fn apply_event<S>(store: &S, envelope: &Envelope) -> Result<Outcome, StoreError>
where
    S: AnalyticsStore + ?Sized,
{
    let event_id = envelope.event_id;

    let applied = match &envelope.event {
        Event::OrderCreated { status, .. } => {
            let counts_active = status.as_deref() == Some(STATUS_NEW);
            store.apply_order_created(event_id, counts_active).await?
        }
        Event::CourierCreated {
            courier_id,
            courier_name,
        } => {
            if courier_id.is_empty() {
                return Ok(Outcome::Dropped("courier_created without courier_id".into()));
            }
            store
                .apply_courier_created(event_id, courier_id, courier_name)
                .await?
        }
        Event::OrderCompleted {
            order_id,
            courier_id,
            created_at,
            completed_at,
            ..
        } => {
            let Some(courier_id) = courier_id.as_deref().filter(|id| !id.is_empty()) else {
                return Ok(Outcome::Dropped(format!("order {order_id} completed without courier")));
            };
            let duration = match delivery_seconds(created_at.as_deref(), completed_at.as_deref()) {
                Ok(duration) => duration,
                Err(reason) => return Ok(Outcome::Dropped(format!("order {order_id}: {reason}"))),
            };
            store
                .apply_order_completed(event_id, courier_id, duration)
                .await?
        }
        Event::DeliveryCalculated {
            order_id,
            courier_id,
            cost,
        } => {
            let Some(courier_id) = courier_id.as_deref().filter(|id| !id.is_empty()) else {
                return Ok(Outcome::Dropped(format!("delivery for {order_id} has no courier")));
            };
            let Some(cost) = cost.filter(|cost| cost.is_finite() && *cost >= 0.0) else {
                return Ok(Outcome::Dropped(format!("delivery for {order_id} has no valid cost")));
            };
            store
                .apply_delivery_calculated(event_id, courier_id, cost)
                .await?
        }
    };

    Ok(match applied {
        Applied::Updated => Outcome::Applied,
        Applied::Duplicate => Outcome::Duplicate,
    })
}

fn delivery_seconds(created_at: Option<&str>, completed_at: Option<&str>) -> Result<f64, String> {
    let parse = |name: &str, raw: Option<&str>| {
        let raw = raw.ok_or_else(|| format!("missing {name}"))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|err| format!("unparsable {name} {raw:?}: {err}"))
    };

    let created = parse("created_at", created_at)?;
    let completed = parse("completed_at", completed_at)?;
    if completed < created {
        return Err("completed_at precedes created_at".to_string());
    }

    Ok((completed - created).num_milliseconds() as f64 / 1000.0)
}

/// Resolves the `from`/`to` query bounds. `to` covers its whole day.
pub fn report_window(
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let parse = |name: &str, raw: &str| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest(format!("{name} must be a YYYY-MM-DD date")))
    };

    let from = match from.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => Utc.from_utc_datetime(&parse("from", raw)?.and_time(NaiveTime::MIN)),
        None => DateTime::<Utc>::UNIX_EPOCH,
    };
    let to = match to.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => {
            let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
                .ok_or_else(|| AppError::Internal("invalid end of day".to_string()))?;
            let to = Utc.from_utc_datetime(&parse("to", raw)?.and_time(end_of_day));
            if from > to {
                return Err(AppError::BadRequest("from must not be after to".to_string()));
            }
            to
        }
        // A future `from` yields an empty window.
        None => now,
    };

    Ok((from, to))
}

pub async fn general_report(
    store: &dyn Store,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<OrderReport, AppError> {
    let (from, to) = report_window(from, to, Utc::now())?;
    Ok(store.order_report(from, to).await?)
}

pub async fn counters(store: &dyn Store) -> Result<GeneralStats, AppError> {
    Ok(store.general_stats().await?)
}

pub async fn leaderboard(store: &dyn Store) -> Result<Vec<CourierStats>, AppError> {
    Ok(store.courier_leaderboard().await?)
}

pub async fn courier_stats(store: &dyn Store, courier_id: &str) -> Result<CourierStats, AppError> {
    store
        .courier_stats(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no statistics for courier {courier_id}")))
}
