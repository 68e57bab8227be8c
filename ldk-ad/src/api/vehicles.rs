//! Inventory endpoints
//!
//! Every mutation publishes the matching `LdkEvent`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use ldk_common::api::{Page, PageQuery};
use ldk_common::db::vehicles::{self, SortOrder, VehicleFilter, VehicleSort};
use ldk_common::events::LdkEvent;
use ldk_common::models::{vin_check_digit_ok, NewVehicle, Vehicle, VehicleStatus, VehicleUpdate};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Vehicle plus derived fields
#[derive(Debug, Serialize)]
pub struct VehicleView {
    #[serde(flatten)]
    pub vehicle: Vehicle,
    pub days_on_lot: i64,
    pub vin_check_digit_ok: bool,
}

impl VehicleView {
    pub fn new(vehicle: Vehicle) -> Self {
        let days_on_lot = vehicle.days_on_lot(ldk_common::time::now());
        let vin_check_digit_ok = vin_check_digit_ok(&vehicle.vin);
        Self {
            vehicle,
            days_on_lot,
            vin_check_digit_ok,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListVehiclesQuery {
    pub status: Option<String>,
    pub make: Option<String>,
    pub q: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// GET /api/vehicles
pub async fn list_vehicles(
    State(state): State<AppState>,
    Query(query): Query<ListVehiclesQuery>,
) -> ApiResult<Json<Page<VehicleView>>> {
    let filter = VehicleFilter {
        status: query.status.as_deref().map(str::parse::<VehicleStatus>).transpose()?,
        make: query.make,
        q: query.q,
        min_price: query.min_price,
        max_price: query.max_price,
    };
    let sort = query.sort.as_deref().map(VehicleSort::parse).transpose()?.unwrap_or_default();
    let order = query.order.as_deref().map(SortOrder::parse).transpose()?.unwrap_or_default();

    let page = vehicles::list_vehicles(
        &state.db,
        &filter,
        sort,
        order,
        PageQuery::new(query.page, query.page_size),
    )
    .await?;

    Ok(Json(page.map(VehicleView::new)))
}

/// POST /api/vehicles
pub async fn create_vehicle(
    State(state): State<AppState>,
    Json(req): Json<NewVehicle>,
) -> ApiResult<(StatusCode, Json<VehicleView>)> {
    let now = ldk_common::time::now();
    let vehicle = req.into_vehicle(now)?;
    vehicles::insert_vehicle(&state.db, &vehicle).await?;

    info!(vehicle_id = %vehicle.id, stock_number = %vehicle.stock_number, "Vehicle created");
    state.event_bus.emit_lossy(LdkEvent::VehicleCreated {
        vehicle_id: vehicle.id,
        stock_number: vehicle.stock_number.clone(),
        timestamp: now,
    });

    Ok((StatusCode::CREATED, Json(VehicleView::new(vehicle))))
}

/// GET /api/vehicles/:id
pub async fn get_vehicle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VehicleView>> {
    let vehicle = vehicles::require_vehicle(&state.db, id).await?;
    Ok(Json(VehicleView::new(vehicle)))
}

/// PUT /api/vehicles/:id
///
/// Partial update. Status changes go through the status endpoint.
pub async fn update_vehicle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<VehicleUpdate>,
) -> ApiResult<Json<VehicleView>> {
    let now = ldk_common::time::now();
    let mut vehicle = vehicles::require_vehicle(&state.db, id).await?;
    update.apply(&mut vehicle, now)?;
    vehicles::update_vehicle(&state.db, &vehicle).await?;

    info!(vehicle_id = %id, "Vehicle updated");
    state.event_bus.emit_lossy(LdkEvent::VehicleUpdated {
        vehicle_id: id,
        timestamp: now,
    });

    Ok(Json(VehicleView::new(vehicle)))
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: VehicleStatus,
}

/// POST /api/vehicles/:id/status
pub async fn change_vehicle_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> ApiResult<Json<VehicleView>> {
    let now = ldk_common::time::now();
    let mut vehicle = vehicles::require_vehicle(&state.db, id).await?;
    let old_status = vehicle.status;
    if old_status == req.status {
        return Ok(Json(VehicleView::new(vehicle)));
    }

    vehicle.transition_to(req.status, now)?;
    vehicles::update_vehicle(&state.db, &vehicle).await?;

    info!(vehicle_id = %id, from = %old_status, to = %req.status, "Vehicle status changed");
    state.event_bus.emit_lossy(LdkEvent::VehicleStatusChanged {
        vehicle_id: id,
        old_status,
        new_status: req.status,
        timestamp: now,
    });

    Ok(Json(VehicleView::new(vehicle)))
}

/// DELETE /api/vehicles/:id
///
/// Snapshots cascade; alerts and consignments keep their rows with the link cleared.
pub async fn delete_vehicle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let vehicle = vehicles::require_vehicle(&state.db, id).await?;
    if vehicle.status == VehicleStatus::Sold {
        return Err(ApiError::Conflict(format!(
            "Vehicle {} is sold; archive it instead of deleting",
            vehicle.stock_number
        )));
    }

    if !vehicles::delete_vehicle(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("Vehicle {}", id)));
    }

    info!(vehicle_id = %id, stock_number = %vehicle.stock_number, "Vehicle deleted");
    state.event_bus.emit_lossy(LdkEvent::VehicleDeleted {
        vehicle_id: id,
        timestamp: ldk_common::time::now(),
    });

    Ok(StatusCode::NO_CONTENT)
}
