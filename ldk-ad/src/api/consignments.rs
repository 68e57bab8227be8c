//! Consignment intake (public) and review (admin)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use ldk_common::api::{Page, PageQuery};
use ldk_common::events::LdkEvent;
use ldk_common::models::{ConsignmentStatus, ConsignmentSubmission, NewConsignment};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::vehicles::VehicleView;
use crate::db::consignments::{self, ApproveConsignment};
use crate::error::ApiResult;
use crate::AppState;

/// Receipt returned to the submitting customer
#[derive(Debug, Serialize)]
pub struct SubmissionReceipt {
    pub id: Uuid,
    pub status: ConsignmentStatus,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// POST /api/consignments (public)
pub async fn submit_consignment(
    State(state): State<AppState>,
    Json(form): Json<NewConsignment>,
) -> ApiResult<(StatusCode, Json<SubmissionReceipt>)> {
    let now = ldk_common::time::now();
    let sub = form.into_submission(now)?;
    consignments::insert_consignment(&state.db, &sub).await?;

    info!(consignment_id = %sub.id, vin = %sub.vin, "Consignment submitted");
    state.event_bus.emit_lossy(LdkEvent::ConsignmentSubmitted {
        consignment_id: sub.id,
        vin: sub.vin.clone(),
        timestamp: now,
    });

    Ok((
        StatusCode::CREATED,
        Json(SubmissionReceipt {
            id: sub.id,
            status: sub.status,
            submitted_at: sub.submitted_at,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListConsignmentsQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// GET /api/consignments
pub async fn list_consignments(
    State(state): State<AppState>,
    Query(query): Query<ListConsignmentsQuery>,
) -> ApiResult<Json<Page<ConsignmentSubmission>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ConsignmentStatus>)
        .transpose()?;
    let page_query = PageQuery::new(query.page, query.page_size);
    let page = consignments::list_consignments(&state.db, status, page_query).await?;
    Ok(Json(page))
}

/// GET /api/consignments/:id
pub async fn get_consignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConsignmentSubmission>> {
    Ok(Json(consignments::require_consignment(&state.db, id).await?))
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub consignment: ConsignmentSubmission,
    pub vehicle: VehicleView,
    pub reactivated: bool,
}

/// POST /api/consignments/:id/approve
pub async fn approve_consignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<ApproveConsignment>,
) -> ApiResult<Json<ApprovalResponse>> {
    let now = ldk_common::time::now();
    let approval = consignments::approve_consignment(&state.db, id, form, now).await?;

    if !approval.reactivated {
        state.event_bus.emit_lossy(LdkEvent::VehicleCreated {
            vehicle_id: approval.vehicle.id,
            stock_number: approval.vehicle.stock_number.clone(),
            timestamp: now,
        });
    } else {
        state.event_bus.emit_lossy(LdkEvent::VehicleUpdated {
            vehicle_id: approval.vehicle.id,
            timestamp: now,
        });
    }
    state.event_bus.emit_lossy(LdkEvent::ConsignmentReviewed {
        consignment_id: id,
        status: ConsignmentStatus::Approved,
        vehicle_id: Some(approval.vehicle.id),
        timestamp: now,
    });

    Ok(Json(ApprovalResponse {
        consignment: approval.submission,
        vehicle: VehicleView::new(approval.vehicle),
        reactivated: approval.reactivated,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub note: Option<String>,
}

/// POST /api/consignments/:id/reject
pub async fn reject_consignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<ConsignmentSubmission>> {
    let now = ldk_common::time::now();
    let sub = consignments::reject_consignment(&state.db, id, req.note, now).await?;

    state.event_bus.emit_lossy(LdkEvent::ConsignmentReviewed {
        consignment_id: id,
        status: ConsignmentStatus::Rejected,
        vehicle_id: None,
        timestamp: now,
    });

    Ok(Json(sub))
}
