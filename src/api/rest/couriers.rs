use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::api::rest::ApiJson;
use crate::engine::couriers::{self, NewCourier};
use crate::error::AppError;
use crate::models::courier::Courier;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewCourier>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    let courier = couriers::register_courier(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(couriers::list_couriers(&state).await?))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(couriers::get_courier(&state, &id).await?))
}
