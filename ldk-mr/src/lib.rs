//! ldk-mr library - Market Research service
//!
//! Comparable-listing snapshots for inventory, competitor tracking and the
//! background job scheduler. Listens on port 5781 by default and shares
//! `lotdesk.db` with ldk-ad.

use axum::Router;
use ldk_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

pub mod analysis;
pub mod api;
pub mod cache;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod services;
pub mod source;

pub use error::{ApiError, ApiResult, MrError, MrResult};

use scheduler::Scheduler;
use services::{CompetitorTracker, SnapshotService};
use source::ComparableSource;

/// Module name reported by `/health` and SSE logs
pub const MODULE_NAME: &str = "ldk-mr";

/// Default listen port
pub const DEFAULT_PORT: u16 = 5781;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    /// 0 disables request signing
    pub shared_secret: i64,
    pub startup_time: Instant,
    pub source: Arc<dyn ComparableSource>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        shared_secret: i64,
        source: Arc<dyn ComparableSource>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            db.clone(),
            Arc::clone(&source),
            event_bus.clone(),
        ));
        Self {
            db,
            event_bus,
            shared_secret,
            startup_time: Instant::now(),
            source,
            scheduler,
        }
    }

    pub fn snapshot_service(&self) -> SnapshotService {
        SnapshotService::new(self.db.clone(), Arc::clone(&self.source), self.event_bus.clone())
    }

    pub fn competitor_tracker(&self) -> CompetitorTracker {
        CompetitorTracker::new(self.db.clone(), self.event_bus.clone())
    }
}

/// Build application router
///
/// `/health` and `/events` are public; every other route requires a
/// signed request.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};
    use ldk_common::api::{require_signed_request, AuthConfig};

    let auth = AuthConfig::new(state.db.clone(), state.shared_secret);

    let protected = Router::new()
        .route("/api/market/vehicles/:id/snapshot", post(api::run_snapshot))
        .route("/api/market/vehicles/:id/snapshots", get(api::list_snapshots))
        .route("/api/market/vehicles/:id/latest", get(api::latest_snapshot))
        .route("/api/market/vehicles/:id/trend", get(api::market_trend))
        .route("/api/market/overview", get(api::market_overview))
        .route("/api/competitors", get(api::list_competitors))
        .route("/api/competitors/scans", post(api::ingest_scan))
        .route("/api/competitors/listings", get(api::list_listings))
        .route("/api/competitors/listings/:id/history", get(api::listing_history))
        .route("/api/jobs", get(api::list_jobs))
        .route("/api/jobs/:name/run", post(api::run_job))
        .route("/api/jobs/:name/runs", get(api::list_job_runs))
        .layer(middleware::from_fn_with_state(auth, require_signed_request));

    let public = Router::new()
        .route("/events", get(api::event_stream))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
