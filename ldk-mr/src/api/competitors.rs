//! Competitor scan ingestion and listing queries

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ldk_common::api::{Page, PageQuery};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::competitors::{
    self, CompetitorListing, CompetitorSummary, ListingFilter, ListingView, PricePoint,
};
use crate::error::{ApiError, ApiResult};
use crate::services::{ScanBatch, ScanSummary};
use crate::AppState;

/// POST /api/competitors/scans
pub async fn ingest_scan(
    State(state): State<AppState>,
    Json(batch): Json<ScanBatch>,
) -> ApiResult<Json<ScanSummary>> {
    let summary = state.competitor_tracker().ingest_scan(batch).await?;
    Ok(Json(summary))
}

/// GET /api/competitors
pub async fn list_competitors(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CompetitorSummary>>> {
    Ok(Json(competitors::list_competitors(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListListingsQuery {
    pub competitor_id: Option<Uuid>,
    /// Only listings not marked removed (default true)
    pub active: Option<bool>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// GET /api/competitors/listings
pub async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListListingsQuery>,
) -> ApiResult<Json<Page<ListingView>>> {
    let filter = ListingFilter {
        competitor_id: query.competitor_id,
        active_only: query.active.unwrap_or(true),
        make: query.make.filter(|m| !m.trim().is_empty()),
        model: query.model.filter(|m| !m.trim().is_empty()),
    };
    let page = competitors::list_listings(
        &state.db,
        &filter,
        PageQuery::new(query.page, query.page_size),
        ldk_common::time::now(),
    )
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
pub struct ListingHistoryResponse {
    pub listing: CompetitorListing,
    /// Oldest first
    pub history: Vec<PricePoint>,
}

/// GET /api/competitors/listings/:id/history
pub async fn listing_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ListingHistoryResponse>> {
    let listing = competitors::load_listing(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Competitor listing {}", id)))?;
    let history = competitors::listing_history(&state.db, id).await?;
    Ok(Json(ListingHistoryResponse { listing, history }))
}
