//! ldk-ad library - Admin Desk service
//!
//! Inventory, consignment intake and review, alerts, settings and the
//! dashboard summary. Listens on port 5780 by default.

use axum::Router;
use ldk_common::events::EventBus;
use sqlx::SqlitePool;
use std::time::Instant;

pub mod api;
pub mod db;
pub mod error;

pub use error::{ApiError, ApiResult};

/// Module name reported by `/health` and SSE logs
pub const MODULE_NAME: &str = "ldk-ad";

/// Default listen port
pub const DEFAULT_PORT: u16 = 5780;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    /// 0 disables request signing
    pub shared_secret: i64,
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, shared_secret: i64) -> Self {
        Self {
            db,
            event_bus,
            shared_secret,
            startup_time: Instant::now(),
        }
    }
}

/// Build application router
///
/// `/health`, `/events` and the consignment intake form are public; every
/// other route requires a signed request.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post, put};
    use ldk_common::api::{require_signed_request, AuthConfig};

    let auth = AuthConfig::new(state.db.clone(), state.shared_secret);

    let protected = Router::new()
        .route("/api/vehicles", get(api::list_vehicles).post(api::create_vehicle))
        .route(
            "/api/vehicles/:id",
            get(api::get_vehicle).put(api::update_vehicle).delete(api::delete_vehicle),
        )
        .route("/api/vehicles/:id/status", post(api::change_vehicle_status))
        .route("/api/consignments", get(api::list_consignments))
        .route("/api/consignments/:id", get(api::get_consignment))
        .route("/api/consignments/:id/approve", post(api::approve_consignment))
        .route("/api/consignments/:id/reject", post(api::reject_consignment))
        .route("/api/alerts", get(api::list_alerts))
        .route("/api/alerts/:id/acknowledge", post(api::acknowledge_alert))
        .route("/api/settings", get(api::list_settings))
        .route("/api/settings/:key", put(api::update_setting))
        .route("/api/dashboard", get(api::get_dashboard))
        .layer(middleware::from_fn_with_state(auth, require_signed_request));

    let public = Router::new()
        .route("/api/consignments", post(api::submit_consignment))
        .route("/events", get(api::event_stream))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
