use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::api::rest::ApiJson;
use crate::engine::pricing::{self, DeliveryRequest, Quote};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/calculate", post(calculate))
}

async fn calculate(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<DeliveryRequest>,
) -> Result<Json<Quote>, AppError> {
    Ok(Json(pricing::quote(&state, &payload).await?))
}
