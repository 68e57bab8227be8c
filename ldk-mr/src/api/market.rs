//! Market snapshot endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use ldk_common::db::settings::{get_setting_or_default, MR_TREND_FLAT_PCT};
use ldk_common::db::vehicles::require_vehicle;
use ldk_common::models::MarketPosition;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{trend_direction, SnapshotPoint, TrendDirection};
use crate::db::snapshots::{self, MarketSnapshot, OverviewEntry, SnapshotWithListings};
use crate::error::{ApiError, ApiResult};
use crate::services::SnapshotReport;
use crate::AppState;

const DEFAULT_SNAPSHOT_LIMIT: i64 = 20;
const MAX_SNAPSHOT_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn resolve(&self, default: i64, max: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

/// POST /api/market/vehicles/:id/snapshot
pub async fn run_snapshot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<SnapshotReport>)> {
    let report = state.snapshot_service().run_for_vehicle(id).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /api/market/vehicles/:id/snapshots?limit=
pub async fn list_snapshots(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<MarketSnapshot>>> {
    require_vehicle(&state.db, id).await?;
    let limit = query.resolve(DEFAULT_SNAPSHOT_LIMIT, MAX_SNAPSHOT_LIMIT);
    Ok(Json(snapshots::list_snapshots(&state.db, id, limit).await?))
}

/// GET /api/market/vehicles/:id/latest
pub async fn latest_snapshot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SnapshotWithListings>> {
    require_vehicle(&state.db, id).await?;
    snapshots::load_latest_with_listings(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No market snapshot for vehicle {}", id)))
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub vehicle_id: Uuid,
    pub direction: TrendDirection,
    pub flat_pct: f64,
    pub latest_position: Option<MarketPosition>,
    /// Oldest first
    pub history: Vec<SnapshotPoint>,
}

/// GET /api/market/vehicles/:id/trend
pub async fn market_trend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TrendResponse>> {
    require_vehicle(&state.db, id).await?;
    let flat_pct: f64 = get_setting_or_default(&state.db, MR_TREND_FLAT_PCT).await?;
    let history = snapshots::price_history(&state.db, id).await?;

    Ok(Json(TrendResponse {
        vehicle_id: id,
        direction: trend_direction(&history, flat_pct),
        flat_pct,
        latest_position: history.last().map(|p| p.position),
        history,
    }))
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub generated_at: DateTime<Utc>,
    pub vehicles: Vec<OverviewEntry>,
}

/// GET /api/market/overview
pub async fn market_overview(State(state): State<AppState>) -> ApiResult<Json<OverviewResponse>> {
    let now = ldk_common::time::now();
    let vehicles = snapshots::market_overview(&state.db, now).await?;
    Ok(Json(OverviewResponse {
        generated_at: now,
        vehicles,
    }))
}
