//! Dashboard summary

use axum::{extract::State, Json};
use ldk_common::db::{alerts, vehicles};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::{consignments, dashboard};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub vehicles_by_status: BTreeMap<String, i64>,
    pub average_days_on_lot: Option<f64>,
    pub pending_consignments: i64,
    pub open_alerts: i64,
    /// Available vehicles by the position of their latest market snapshot
    pub market_positions: BTreeMap<String, i64>,
}

/// GET /api/dashboard
pub async fn get_dashboard(State(state): State<AppState>) -> ApiResult<Json<DashboardResponse>> {
    let now = ldk_common::time::now();
    Ok(Json(DashboardResponse {
        vehicles_by_status: vehicles::count_by_status(&state.db).await?,
        average_days_on_lot: dashboard::average_days_on_lot(&state.db, now).await?,
        pending_consignments: consignments::count_pending(&state.db).await?,
        open_alerts: alerts::count_open_alerts(&state.db).await?,
        market_positions: dashboard::latest_position_counts(&state.db).await?,
    }))
}
