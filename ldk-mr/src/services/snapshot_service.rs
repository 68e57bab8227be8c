//! Market snapshot runs
//!
//! A run pulls comps for one vehicle (through the cache), filters and
//! analyzes them, then stores the snapshot and its comps in one
//! transaction together with any alerts the change from the previous
//! snapshot implies.

use chrono::{DateTime, Duration, Utc};
use ldk_common::db::alerts::raise_alert;
use ldk_common::db::settings::{
    get_setting_or_default, DEALER_ZIP, MR_COMPETITIVE_BAND_PCT, MR_COMP_CACHE_TTL_HOURS,
    MR_MAX_COMPS, MR_MEDIAN_MOVE_ALERT_PCT, MR_MILEAGE_WINDOW, MR_SEARCH_RADIUS_MILES,
    MR_SNAPSHOT_INTERVAL_HOURS, MR_YEAR_WINDOW,
};
use ldk_common::db::vehicles::require_vehicle;
use ldk_common::events::{EventBus, LdkEvent};
use ldk_common::models::{Alert, Vehicle, VehicleStatus};
use ldk_common::{time, Error};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::{
    analyze, compare_snapshots, evaluate_snapshot_alerts, filter_comparables, AlertThresholds,
    SnapshotDelta,
};
use crate::cache;
use crate::db::snapshots::{
    insert_listing, insert_snapshot, load_latest, MarketListing, MarketSnapshot,
    SnapshotWithListings,
};
use crate::error::MrResult;
use crate::source::{CompQuery, ComparableSource};

/// Snapshot tuning read from settings at the start of each run
#[derive(Debug, Clone)]
pub struct SnapshotParams {
    pub band_pct: f64,
    pub median_move_pct: f64,
    pub year_window: i32,
    pub mileage_window: i64,
    pub radius_miles: u32,
    pub max_comps: usize,
    pub zip: Option<String>,
    pub cache_ttl: Duration,
    pub interval: Duration,
}

impl SnapshotParams {
    pub async fn load(db: &SqlitePool) -> ldk_common::Result<Self> {
        let zip: String = get_setting_or_default(db, DEALER_ZIP).await?;
        let ttl_hours: i64 = get_setting_or_default(db, MR_COMP_CACHE_TTL_HOURS).await?;
        let interval_hours: i64 = get_setting_or_default(db, MR_SNAPSHOT_INTERVAL_HOURS).await?;

        Ok(Self {
            band_pct: get_setting_or_default(db, MR_COMPETITIVE_BAND_PCT).await?,
            median_move_pct: get_setting_or_default(db, MR_MEDIAN_MOVE_ALERT_PCT).await?,
            year_window: get_setting_or_default(db, MR_YEAR_WINDOW).await?,
            mileage_window: get_setting_or_default(db, MR_MILEAGE_WINDOW).await?,
            radius_miles: get_setting_or_default(db, MR_SEARCH_RADIUS_MILES).await?,
            max_comps: get_setting_or_default(db, MR_MAX_COMPS).await?,
            zip: Some(zip.trim().to_string()).filter(|z| !z.is_empty()),
            cache_ttl: setting_hours(MR_COMP_CACHE_TTL_HOURS, ttl_hours)?,
            interval: setting_hours(MR_SNAPSHOT_INTERVAL_HOURS, interval_hours)?,
        })
    }

    /// Comparable search for `vehicle`: same make/model, year ± window
    ///
    /// Trim is left out so thin markets still produce comps.
    pub fn comp_query(&self, vehicle: &Vehicle) -> ldk_common::Result<CompQuery> {
        let (Some(year_min), Some(year_max)) = (
            vehicle.year.checked_sub(self.year_window),
            vehicle.year.checked_add(self.year_window),
        ) else {
            return Err(Error::Config(format!(
                "{} of {} is out of range for model year {}",
                MR_YEAR_WINDOW, self.year_window, vehicle.year
            )));
        };
        Ok(CompQuery {
            year_min,
            year_max,
            make: vehicle.make.clone(),
            model: vehicle.model.clone(),
            trim: None,
            zip: self.zip.clone(),
            radius_miles: self.radius_miles,
            limit: self.max_comps,
        })
    }
}

fn setting_hours(key: &str, hours: i64) -> ldk_common::Result<Duration> {
    Duration::try_hours(hours)
        .ok_or_else(|| Error::Config(format!("{} of {} hours is out of range", key, hours)))
}

/// Result of one snapshot run
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    #[serde(flatten)]
    pub snapshot: SnapshotWithListings,
    /// Change from the previous snapshot, `None` on the first run
    pub delta: Option<SnapshotDelta>,
    pub alerts: Vec<Alert>,
}

/// Whether `vehicle` should be snapshotted again at `now`
pub fn snapshot_due(
    vehicle: &Vehicle,
    latest_taken_at: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    if vehicle.status != VehicleStatus::Available {
        return false;
    }
    match latest_taken_at {
        Some(taken_at) => now.signed_duration_since(taken_at) >= interval,
        None => true,
    }
}

pub struct SnapshotService {
    db: SqlitePool,
    source: Arc<dyn ComparableSource>,
    event_bus: EventBus,
}

impl SnapshotService {
    pub fn new(db: SqlitePool, source: Arc<dyn ComparableSource>, event_bus: EventBus) -> Self {
        Self { db, source, event_bus }
    }

    /// Take a market snapshot for one vehicle now
    ///
    /// Sold and archived vehicles are refused with `Conflict`.
    pub async fn run_for_vehicle(&self, vehicle_id: Uuid) -> MrResult<SnapshotReport> {
        let now = time::now();
        let vehicle = require_vehicle(&self.db, vehicle_id).await?;
        if matches!(vehicle.status, VehicleStatus::Sold | VehicleStatus::Archived) {
            return Err(Error::Conflict(format!(
                "Vehicle {} is {}; market snapshots need active inventory",
                vehicle.stock_number, vehicle.status
            ))
            .into());
        }

        let params = SnapshotParams::load(&self.db).await?;
        let query = params.comp_query(&vehicle)?;
        let fetched =
            cache::get_or_fetch(&self.db, self.source.as_ref(), &query, params.cache_ttl, now)
                .await?;

        let comps = filter_comparables(&vehicle, &fetched.listings, params.mileage_window);
        debug!(
            vehicle_id = %vehicle.id,
            fetched = fetched.listings.len(),
            kept = comps.len(),
            cache_hit = fetched.cache_hit,
            "Filtered comparables"
        );
        let analysis = analyze(vehicle.price, &comps, params.band_pct);

        let snapshot = MarketSnapshot::from_analysis(
            vehicle.id,
            vehicle.price,
            self.source.name(),
            fetched.cache_hit,
            &analysis,
            now,
        );
        let listings: Vec<MarketListing> = comps
            .iter()
            .filter_map(|comp| MarketListing::from_comp(snapshot.id, comp, now))
            .collect();

        let mut tx = self.db.begin().await?;

        let previous = load_latest(&mut *tx, vehicle.id).await?;
        insert_snapshot(&mut *tx, &snapshot).await?;
        for listing in &listings {
            insert_listing(&mut *tx, listing).await?;
        }

        let delta = previous.map(|prev| compare_snapshots(&prev.point(), &snapshot.point()));
        let mut alerts = Vec::new();
        if let Some(delta) = &delta {
            let thresholds = AlertThresholds {
                median_move_pct: params.median_move_pct,
            };
            for new_alert in evaluate_snapshot_alerts(&vehicle, delta, thresholds) {
                if let Some(alert) = raise_alert(&mut *tx, new_alert, now).await? {
                    alerts.push(alert);
                }
            }
        }

        tx.commit().await?;

        info!(
            vehicle_id = %vehicle.id,
            stock_number = %vehicle.stock_number,
            comps = snapshot.comp_count,
            position = snapshot.position.as_str(),
            alerts = alerts.len(),
            "Market snapshot stored"
        );

        self.event_bus.emit_lossy(LdkEvent::SnapshotCompleted {
            vehicle_id: vehicle.id,
            snapshot_id: snapshot.id,
            comp_count: snapshot.comp_count,
            median_price: snapshot.median_price,
            position: snapshot.position,
            timestamp: now,
        });
        for alert in &alerts {
            self.event_bus.emit_lossy(LdkEvent::alert_raised(alert));
        }

        Ok(SnapshotReport {
            snapshot: SnapshotWithListings { snapshot, listings },
            delta,
            alerts,
        })
    }
}
