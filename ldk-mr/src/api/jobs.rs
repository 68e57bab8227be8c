//! Background job status and manual triggers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::market::LimitQuery;
use crate::db::job_runs::{self, JobRun};
use crate::error::ApiResult;
use crate::scheduler::{JobInfo, JobKind};
use crate::AppState;

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobInfo>>> {
    Ok(Json(state.scheduler.job_infos().await?))
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job: JobKind,
    pub run_id: Uuid,
    pub status: &'static str,
}

/// POST /api/jobs/:name/run
///
/// 202 once the run is recorded; 409 while the job is already running.
pub async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let job: JobKind = name.parse()?;
    let run_id = state.scheduler.trigger(job).await?;
    info!(job = job.as_str(), %run_id, "Job triggered manually");
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job,
            run_id,
            status: "started",
        }),
    ))
}

/// GET /api/jobs/:name/runs?limit=
pub async fn list_job_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<JobRun>>> {
    let job: JobKind = name.parse()?;
    let runs = job_runs::list_runs(&state.db, job.as_str(), query.resolve(20, 200)).await?;
    Ok(Json(runs))
}
