//! Snapshot-to-snapshot comparison, trend direction and alert rules

use chrono::{DateTime, Utc};
use ldk_common::models::{AlertKind, AlertSeverity, MarketPosition, NewAlert, Vehicle};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::stats::percent_change;

/// The parts of a stored snapshot that trend analysis needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPoint {
    pub taken_at: DateTime<Utc>,
    pub median_price: Option<f64>,
    pub our_price: i64,
    pub position: MarketPosition,
    pub comp_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDelta {
    pub median_change_pct: Option<f64>,
    pub our_price_change_pct: Option<f64>,
    /// (from, to) when the position moved between two known positions
    pub position_changed: Option<(MarketPosition, MarketPosition)>,
    pub comp_count_change: i64,
}

pub fn compare_snapshots(prev: &SnapshotPoint, cur: &SnapshotPoint) -> SnapshotDelta {
    let median_change_pct = match (prev.median_price, cur.median_price) {
        (Some(old), Some(new)) => percent_change(old, new),
        _ => None,
    };
    // Losing or gaining comps entirely is not a market move
    let position_changed = if prev.position != cur.position
        && prev.position != MarketPosition::Unknown
        && cur.position != MarketPosition::Unknown
    {
        Some((prev.position, cur.position))
    } else {
        None
    };

    SnapshotDelta {
        median_change_pct,
        our_price_change_pct: percent_change(prev.our_price as f64, cur.our_price as f64),
        position_changed,
        comp_count_change: cur.comp_count - prev.comp_count,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Direction of the comp median across `series` (oldest first)
///
/// Compares the first and last points that have a median; moves smaller
/// than `flat_pct` percent count as flat.
pub fn trend_direction(series: &[SnapshotPoint], flat_pct: f64) -> TrendDirection {
    let medians: Vec<f64> = series.iter().filter_map(|p| p.median_price).collect();
    if medians.len() < 2 {
        return TrendDirection::Flat;
    }
    let (first, last) = (medians[0], medians[medians.len() - 1]);
    match percent_change(first, last) {
        Some(change) if change >= flat_pct.abs() && change > 0.0 => TrendDirection::Rising,
        Some(change) if change <= -flat_pct.abs() && change < 0.0 => TrendDirection::Falling,
        _ => TrendDirection::Flat,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    /// Minimum |median change| in percent for `median_moved`
    pub median_move_pct: f64,
}

/// Alerts implied by the change from the previous snapshot
pub fn evaluate_snapshot_alerts(
    vehicle: &Vehicle,
    delta: &SnapshotDelta,
    thresholds: AlertThresholds,
) -> Vec<NewAlert> {
    let mut alerts = Vec::new();

    if let Some((from, to)) = delta.position_changed {
        let severity = if to == MarketPosition::AboveMarket {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        };
        alerts.push(NewAlert::for_vehicle(
            vehicle.id,
            AlertKind::PositionChanged,
            severity,
            format!(
                "{} {} {} ({}) moved from {} to {}",
                vehicle.year,
                vehicle.make,
                vehicle.model,
                vehicle.stock_number,
                from.as_str(),
                to.as_str()
            ),
            json!({ "from": from, "to": to }),
        ));
    }

    if let Some(change) = delta.median_change_pct {
        if change.abs() >= thresholds.median_move_pct {
            let direction = if change > 0.0 { "up" } else { "down" };
            alerts.push(NewAlert::for_vehicle(
                vehicle.id,
                AlertKind::MedianMoved,
                AlertSeverity::Info,
                format!(
                    "Market median for {} {} {} ({}) moved {} {:.1}%",
                    vehicle.year,
                    vehicle.make,
                    vehicle.model,
                    vehicle.stock_number,
                    direction,
                    change.abs()
                ),
                json!({ "median_change_pct": change }),
            ));
        }
    }

    alerts
}
