use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::api::rest::ApiJson;
use crate::engine::tracking::{self, OrderPositionUpdate, PositionUpdate};
use crate::error::AppError;
use crate::models::tracking::{OrderTracking, TrackingRecord};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers/tracking", post(record_position))
        .route("/couriers/tracking/:courier_id", get(get_position))
        .route("/tracking", post(record_order_position))
        .route("/tracking/:order_id", get(get_order_position))
}

async fn record_position(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<PositionUpdate>,
) -> Result<(StatusCode, Json<TrackingRecord>), AppError> {
    let record = tracking::record_position(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_position(
    State(state): State<Arc<AppState>>,
    Path(courier_id): Path<String>,
) -> Result<Json<TrackingRecord>, AppError> {
    Ok(Json(tracking::get_position(&state, &courier_id).await?))
}

async fn record_order_position(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<OrderPositionUpdate>,
) -> Result<Json<OrderTracking>, AppError> {
    Ok(Json(tracking::record_order_position(&state, payload).await?))
}

async fn get_order_position(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderTracking>, AppError> {
    Ok(Json(tracking::get_order_position(&state, &order_id).await?))
}
