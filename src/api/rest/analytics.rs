use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::analytics;
use crate::error::AppError;
use crate::models::stats::{CourierStats, GeneralStats, OrderReport};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analytics/general", get(general_report))
        .route("/analytics/counters", get(counters))
        .route("/analytics/couriers", get(leaderboard))
        .route("/analytics/couriers/:id", get(courier_stats))
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

async fn general_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<OrderReport>, AppError> {
    let report =
        analytics::general_report(&*state.store, query.from.as_deref(), query.to.as_deref()).await?;
    Ok(Json(report))
}

async fn counters(State(state): State<Arc<AppState>>) -> Result<Json<GeneralStats>, AppError> {
    Ok(Json(analytics::counters(&*state.store).await?))
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CourierStats>>, AppError> {
    Ok(Json(analytics::leaderboard(&*state.store).await?))
}

async fn courier_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CourierStats>, AppError> {
    Ok(Json(analytics::courier_stats(&*state.store, &id).await?))
}
