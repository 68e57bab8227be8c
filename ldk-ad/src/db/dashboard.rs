//! Dashboard aggregates

use chrono::{DateTime, Utc};
use ldk_common::db::vehicles::list_available_vehicles;
use ldk_common::models::MarketPosition;
use ldk_common::Result;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// Key used for available vehicles that were never snapshotted
pub const NO_SNAPSHOT: &str = "no_snapshot";

/// Available vehicles grouped by the position of their latest snapshot
pub async fn latest_position_counts(pool: &SqlitePool) -> Result<BTreeMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(latest.position, 'no_snapshot') AS position, COUNT(*) AS n
        FROM vehicles v
        LEFT JOIN (
            SELECT vehicle_id, position,
                   ROW_NUMBER() OVER (
                       PARTITION BY vehicle_id ORDER BY taken_at DESC, rowid DESC
                   ) AS rn
            FROM market_snapshots
        ) latest ON latest.vehicle_id = v.id AND latest.rn = 1
        WHERE v.status = 'available'
        GROUP BY 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut counts: BTreeMap<String, i64> = MarketPosition::ALL
        .iter()
        .map(|p| (p.as_str().to_string(), 0))
        .chain(std::iter::once((NO_SNAPSHOT.to_string(), 0)))
        .collect();
    for (position, n) in rows {
        counts.insert(position, n);
    }
    Ok(counts)
}

/// Mean days on lot across available vehicles, `None` with no inventory
pub async fn average_days_on_lot(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Option<f64>> {
    let vehicles = list_available_vehicles(pool).await?;
    if vehicles.is_empty() {
        return Ok(None);
    }
    let total: i64 = vehicles.iter().map(|v| v.days_on_lot(now)).sum();
    Ok(Some(total as f64 / vehicles.len() as f64))
}
