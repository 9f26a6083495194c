use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::api::rest::ApiJson;
use crate::engine::lifecycle::{self, NewOrder};
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order).delete(delete_order))
        .route("/orders/:id/assign-courier", put(assign_courier))
        .route("/orders/:id/finish", put(finish_order))
}

#[derive(Deserialize)]
pub struct AssignCourierRequest {
    #[serde(default)]
    pub courier_id: Option<String>,
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub status: OrderStatus,
    pub courier_id: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: OrderStatus,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = lifecycle::create_order(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(lifecycle::list_orders(&state).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(lifecycle::get_order(&state, &id).await?))
}

async fn delete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    lifecycle::delete_order(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<AssignCourierRequest>,
) -> Result<Json<AssignmentResponse>, AppError> {
    let order = lifecycle::assign_courier(&state, &id, payload.courier_id).await?;

    Ok(Json(AssignmentResponse {
        status: order.status,
        courier_id: order.courier_id,
    }))
}

async fn finish_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let order = lifecycle::complete_order(&state, &id).await?;
    Ok(Json(StatusResponse {
        status: order.status,
    }))
}
