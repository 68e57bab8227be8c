//! Alert inbox

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ldk_common::api::{Page, PageQuery};
use ldk_common::db::alerts::{self, AlertFilter};
use ldk_common::models::{Alert, AlertKind};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    /// Only unacknowledged alerts (default true)
    pub open: Option<bool>,
    pub kind: Option<String>,
    pub vehicle_id: Option<Uuid>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// GET /api/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> ApiResult<Json<Page<Alert>>> {
    let filter = AlertFilter {
        only_open: query.open.unwrap_or(true),
        kind: query.kind.as_deref().map(str::parse::<AlertKind>).transpose()?,
        vehicle_id: query.vehicle_id,
    };
    let page_query = PageQuery::new(query.page, query.page_size);
    let page = alerts::list_alerts(&state.db, &filter, page_query).await?;
    Ok(Json(page))
}

/// POST /api/alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    let alert = alerts::acknowledge_alert(&state.db, id, ldk_common::time::now()).await?;
    info!(alert_id = %id, kind = alert.kind.as_str(), "Alert acknowledged");
    Ok(Json(alert))
}
