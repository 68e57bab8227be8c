//! Market snapshots and the comps captured with them

use chrono::{DateTime, Utc};
use ldk_common::db::parse_uuid;
use ldk_common::models::MarketPosition;
use ldk_common::time::{days_between, from_db, from_db_opt, to_db};
use ldk_common::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::analysis::{MarketAnalysis, SnapshotPoint};
use crate::source::CompListing;

const SNAPSHOT_COLUMNS: &str = "id, vehicle_id, taken_at, source, cache_hit, our_price, \
     comp_count, min_price, max_price, median_price, mean_price, p25_price, p75_price, position, \
     delta_dollars, delta_pct, percentile_rank";

const LISTING_COLUMNS: &str = "id, snapshot_id, vin, year, make, model, trim, price, mileage, \
     dealer_name, city, state, url, listed_at, days_on_market, source";

/// One market analysis run for one vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub source: String,
    pub cache_hit: bool,
    pub our_price: i64,
    pub comp_count: i64,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub median_price: Option<f64>,
    pub mean_price: Option<f64>,
    pub p25_price: Option<f64>,
    pub p75_price: Option<f64>,
    pub position: MarketPosition,
    pub delta_dollars: Option<f64>,
    pub delta_pct: Option<f64>,
    pub percentile_rank: Option<f64>,
}

impl MarketSnapshot {
    pub fn from_analysis(
        vehicle_id: Uuid,
        our_price: i64,
        source: &str,
        cache_hit: bool,
        analysis: &MarketAnalysis,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let summary = &analysis.summary;
        Self {
            id: Uuid::new_v4(),
            vehicle_id,
            taken_at,
            source: source.to_string(),
            cache_hit,
            our_price,
            comp_count: analysis.comp_count as i64,
            min_price: summary.min,
            max_price: summary.max,
            median_price: summary.median,
            mean_price: summary.mean,
            p25_price: summary.p25,
            p75_price: summary.p75,
            position: analysis.position,
            delta_dollars: analysis.delta_dollars,
            delta_pct: analysis.delta_pct,
            percentile_rank: analysis.percentile_rank,
        }
    }

    pub fn point(&self) -> SnapshotPoint {
        SnapshotPoint {
            taken_at: self.taken_at,
            median_price: self.median_price,
            our_price: self.our_price,
            position: self.position,
            comp_count: self.comp_count,
        }
    }
}

/// A comp as it looked when a snapshot was taken
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketListing {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub vin: Option<String>,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub price: i64,
    pub mileage: Option<i64>,
    pub dealer_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub url: Option<String>,
    pub listed_at: Option<DateTime<Utc>>,
    pub days_on_market: Option<i64>,
    pub source: String,
}

impl MarketListing {
    /// `None` for comps without a price, which never survive filtering
    pub fn from_comp(snapshot_id: Uuid, comp: &CompListing, now: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4(),
            snapshot_id,
            vin: comp.vin.clone(),
            year: comp.year,
            make: comp.make.clone(),
            model: comp.model.clone(),
            trim: comp.trim.clone(),
            price: comp.price?,
            mileage: comp.mileage,
            dealer_name: comp.dealer_name.clone(),
            city: comp.city.clone(),
            state: comp.state.clone(),
            url: comp.url.clone(),
            listed_at: comp.listed_at,
            days_on_market: comp.listed_at.map(|listed| days_between(listed, now)),
            source: comp.source.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotWithListings {
    #[serde(flatten)]
    pub snapshot: MarketSnapshot,
    pub listings: Vec<MarketListing>,
}

/// An available vehicle and its most recent snapshot, if it has one
#[derive(Debug, Clone, Serialize)]
pub struct OverviewEntry {
    pub vehicle_id: Uuid,
    pub stock_number: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub price: i64,
    pub days_on_lot: i64,
    pub latest: Option<MarketSnapshot>,
}

fn row_to_snapshot(row: &SqliteRow) -> Result<MarketSnapshot> {
    let id: String = row.get("id");
    let vehicle_id: String = row.get("vehicle_id");
    let taken_at: String = row.get("taken_at");
    let position: String = row.get("position");

    Ok(MarketSnapshot {
        id: parse_uuid(&id)?,
        vehicle_id: parse_uuid(&vehicle_id)?,
        taken_at: from_db(&taken_at)?,
        source: row.get("source"),
        cache_hit: row.get("cache_hit"),
        our_price: row.get("our_price"),
        comp_count: row.get("comp_count"),
        min_price: row.get("min_price"),
        max_price: row.get("max_price"),
        median_price: row.get("median_price"),
        mean_price: row.get("mean_price"),
        p25_price: row.get("p25_price"),
        p75_price: row.get("p75_price"),
        position: position.parse()?,
        delta_dollars: row.get("delta_dollars"),
        delta_pct: row.get("delta_pct"),
        percentile_rank: row.get("percentile_rank"),
    })
}

fn row_to_listing(row: &SqliteRow) -> Result<MarketListing> {
    let id: String = row.get("id");
    let snapshot_id: String = row.get("snapshot_id");

    Ok(MarketListing {
        id: parse_uuid(&id)?,
        snapshot_id: parse_uuid(&snapshot_id)?,
        vin: row.get("vin"),
        year: row.get("year"),
        make: row.get("make"),
        model: row.get("model"),
        trim: row.get("trim"),
        price: row.get("price"),
        mileage: row.get("mileage"),
        dealer_name: row.get("dealer_name"),
        city: row.get("city"),
        state: row.get("state"),
        url: row.get("url"),
        listed_at: from_db_opt(row.get("listed_at"))?,
        days_on_market: row.get("days_on_market"),
        source: row.get("source"),
    })
}

pub async fn insert_snapshot<'e, E>(executor: E, snapshot: &MarketSnapshot) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO market_snapshots (
            id, vehicle_id, taken_at, source, cache_hit, our_price, comp_count,
            min_price, max_price, median_price, mean_price, p25_price, p75_price,
            position, delta_dollars, delta_pct, percentile_rank
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(snapshot.id.to_string())
    .bind(snapshot.vehicle_id.to_string())
    .bind(to_db(&snapshot.taken_at))
    .bind(&snapshot.source)
    .bind(snapshot.cache_hit)
    .bind(snapshot.our_price)
    .bind(snapshot.comp_count)
    .bind(snapshot.min_price)
    .bind(snapshot.max_price)
    .bind(snapshot.median_price)
    .bind(snapshot.mean_price)
    .bind(snapshot.p25_price)
    .bind(snapshot.p75_price)
    .bind(snapshot.position.as_str())
    .bind(snapshot.delta_dollars)
    .bind(snapshot.delta_pct)
    .bind(snapshot.percentile_rank)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_listing<'e, E>(executor: E, listing: &MarketListing) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO market_listings (
            id, snapshot_id, vin, year, make, model, trim, price, mileage,
            dealer_name, city, state, url, listed_at, days_on_market, source
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(listing.id.to_string())
    .bind(listing.snapshot_id.to_string())
    .bind(&listing.vin)
    .bind(listing.year)
    .bind(&listing.make)
    .bind(&listing.model)
    .bind(&listing.trim)
    .bind(listing.price)
    .bind(listing.mileage)
    .bind(&listing.dealer_name)
    .bind(&listing.city)
    .bind(&listing.state)
    .bind(&listing.url)
    .bind(listing.listed_at.as_ref().map(to_db))
    .bind(listing.days_on_market)
    .bind(&listing.source)
    .execute(executor)
    .await?;
    Ok(())
}

/// Most recent snapshot for a vehicle
pub async fn load_latest<'e, E>(executor: E, vehicle_id: Uuid) -> Result<Option<MarketSnapshot>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM market_snapshots WHERE vehicle_id = ? \
         ORDER BY taken_at DESC, rowid DESC LIMIT 1",
        SNAPSHOT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(vehicle_id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_snapshot).transpose()
}

pub async fn latest_taken_at(pool: &SqlitePool, vehicle_id: Uuid) -> Result<Option<DateTime<Utc>>> {
    let taken_at: Option<String> =
        sqlx::query_scalar("SELECT MAX(taken_at) FROM market_snapshots WHERE vehicle_id = ?")
            .bind(vehicle_id.to_string())
            .fetch_one(pool)
            .await?;
    from_db_opt(taken_at)
}

/// Newest first
pub async fn list_snapshots(
    pool: &SqlitePool,
    vehicle_id: Uuid,
    limit: i64,
) -> Result<Vec<MarketSnapshot>> {
    let sql = format!(
        "SELECT {} FROM market_snapshots WHERE vehicle_id = ? \
         ORDER BY taken_at DESC, rowid DESC LIMIT ?",
        SNAPSHOT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(vehicle_id.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_snapshot).collect()
}

/// Comps of one snapshot, cheapest first
pub async fn load_listings(pool: &SqlitePool, snapshot_id: Uuid) -> Result<Vec<MarketListing>> {
    let sql = format!(
        "SELECT {} FROM market_listings WHERE snapshot_id = ? ORDER BY price ASC, rowid ASC",
        LISTING_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(snapshot_id.to_string()).fetch_all(pool).await?;
    rows.iter().map(row_to_listing).collect()
}

pub async fn load_latest_with_listings(
    pool: &SqlitePool,
    vehicle_id: Uuid,
) -> Result<Option<SnapshotWithListings>> {
    let Some(snapshot) = load_latest(pool, vehicle_id).await? else {
        return Ok(None);
    };
    let listings = load_listings(pool, snapshot.id).await?;
    Ok(Some(SnapshotWithListings { snapshot, listings }))
}

/// Every snapshot of a vehicle as a time series, oldest first
pub async fn price_history(pool: &SqlitePool, vehicle_id: Uuid) -> Result<Vec<SnapshotPoint>> {
    let sql = format!(
        "SELECT {} FROM market_snapshots WHERE vehicle_id = ? ORDER BY taken_at ASC, rowid ASC",
        SNAPSHOT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(vehicle_id.to_string()).fetch_all(pool).await?;
    rows.iter()
        .map(|row| row_to_snapshot(row).map(|s| s.point()))
        .collect()
}

/// Available inventory with each vehicle's latest snapshot
pub async fn market_overview(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<OverviewEntry>> {
    let vehicles = ldk_common::db::vehicles::list_available_vehicles(pool).await?;

    let sql = format!(
        r#"
        SELECT {} FROM (
            SELECT s.*, ROW_NUMBER() OVER (
                PARTITION BY s.vehicle_id ORDER BY s.taken_at DESC, s.rowid DESC
            ) AS rn
            FROM market_snapshots s
            JOIN vehicles v ON v.id = s.vehicle_id
            WHERE v.status = 'available'
        )
        WHERE rn = 1
        "#,
        SNAPSHOT_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let mut latest: HashMap<Uuid, MarketSnapshot> = rows
        .iter()
        .map(|row| row_to_snapshot(row).map(|s| (s.vehicle_id, s)))
        .collect::<Result<_>>()?;

    Ok(vehicles
        .into_iter()
        .map(|v| OverviewEntry {
            vehicle_id: v.id,
            days_on_lot: v.days_on_lot(now),
            latest: latest.remove(&v.id),
            stock_number: v.stock_number,
            year: v.year,
            make: v.make,
            model: v.model,
            trim: v.trim,
            price: v.price,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use chrono::Duration;
    use ldk_common::db::init_memory_database;
    use ldk_common::db::vehicles::{insert_vehicle, update_vehicle};
    use ldk_common::models::{NewVehicle, Vehicle, VehicleStatus};

    fn comp(price: i64, listed_days_ago: Option<i64>, now: DateTime<Utc>) -> CompListing {
        CompListing {
            vin: None,
            year: 2019,
            make: "Honda".to_string(),
            model: "Accord".to_string(),
            trim: None,
            price: Some(price),
            mileage: Some(40_000),
            dealer_name: Some(format!("Dealer {}", price)),
            city: None,
            state: None,
            url: None,
            listed_at: listed_days_ago.map(|d| now - Duration::days(d)),
            source: "autodev".to_string(),
        }
    }

    async fn seed_vehicle(
        pool: &SqlitePool,
        stock: &str,
        vin: &str,
        status: VehicleStatus,
    ) -> Vehicle {
        let now = Utc::now();
        let mut v = NewVehicle {
            stock_number: stock.to_string(),
            vin: vin.to_string(),
            year: 2019,
            make: "Honda".to_string(),
            model: "Accord".to_string(),
            trim: None,
            body_style: None,
            exterior_color: None,
            interior_color: None,
            mileage: 40_000,
            price: 21_000,
            cost: None,
            source: None,
            description: None,
            photo_urls: vec![],
        }
        .into_vehicle(now)
        .unwrap();
        insert_vehicle(pool, &v).await.unwrap();
        if status != VehicleStatus::Draft {
            v.transition_to(status, now).unwrap();
            update_vehicle(pool, &v).await.unwrap();
        }
        v
    }

    fn snapshot(
        vehicle: &Vehicle,
        comps: &[CompListing],
        taken_at: DateTime<Utc>,
    ) -> MarketSnapshot {
        let analysis = analyze(vehicle.price, comps, 5.0);
        MarketSnapshot::from_analysis(
            vehicle.id,
            vehicle.price,
            "autodev",
            false,
            &analysis,
            taken_at,
        )
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_with_listings() {
        let pool = init_memory_database().await.unwrap();
        let v = seed_vehicle(&pool, "A1", "1HGCV1F34KA000001", VehicleStatus::Available).await;
        let now = Utc::now();
        let comps = vec![comp(22_000, Some(10), now), comp(20_000, None, now)];

        let snap = snapshot(&v, &comps, now);
        insert_snapshot(&pool, &snap).await.unwrap();
        for c in &comps {
            let listing = MarketListing::from_comp(snap.id, c, now).unwrap();
            insert_listing(&pool, &listing).await.unwrap();
        }

        let loaded = load_latest_with_listings(&pool, v.id).await.unwrap().unwrap();
        assert_eq!(loaded.snapshot.id, snap.id);
        assert_eq!(loaded.snapshot.median_price, Some(21_000.0));
        assert_eq!(loaded.listings.len(), 2);
        assert_eq!(loaded.listings[0].price, 20_000);
        assert_eq!(loaded.listings[0].days_on_market, None);
        assert_eq!(loaded.listings[1].days_on_market, Some(10));
    }

    #[tokio::test]
    async fn test_list_and_history_ordering() {
        let pool = init_memory_database().await.unwrap();
        let v = seed_vehicle(&pool, "A1", "1HGCV1F34KA000001", VehicleStatus::Available).await;
        let now = Utc::now();

        for (days_ago, price) in [(3, 20_000), (2, 21_000), (1, 22_000)] {
            let snap = snapshot(&v, &[comp(price, None, now)], now - Duration::days(days_ago));
            insert_snapshot(&pool, &snap).await.unwrap();
        }

        let newest_first = list_snapshots(&pool, v.id, 2).await.unwrap();
        assert_eq!(newest_first.len(), 2);
        assert_eq!(newest_first[0].median_price, Some(22_000.0));

        let history = price_history(&pool, v.id).await.unwrap();
        let medians: Vec<_> = history.iter().filter_map(|p| p.median_price).collect();
        assert_eq!(medians, vec![20_000.0, 21_000.0, 22_000.0]);

        let latest = latest_taken_at(&pool, v.id).await.unwrap().unwrap();
        assert_eq!(latest, newest_first[0].taken_at);
    }

    #[tokio::test]
    async fn test_market_overview_covers_available_only() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();
        let snapped =
            seed_vehicle(&pool, "A1", "1HGCV1F34KA000001", VehicleStatus::Available).await;
        let fresh = seed_vehicle(&pool, "A2", "1HGCV1F34KA000002", VehicleStatus::Available).await;
        let draft = seed_vehicle(&pool, "A3", "1HGCV1F34KA000003", VehicleStatus::Draft).await;

        let older = snapshot(&snapped, &[comp(20_000, None, now)], now - Duration::days(1));
        let newer = snapshot(&snapped, &[comp(25_000, None, now)], now);
        insert_snapshot(&pool, &older).await.unwrap();
        insert_snapshot(&pool, &newer).await.unwrap();
        insert_snapshot(&pool, &snapshot(&draft, &[], now)).await.unwrap();

        let overview = market_overview(&pool, now).await.unwrap();
        assert_eq!(overview.len(), 2);
        let entry = overview.iter().find(|e| e.vehicle_id == snapped.id).unwrap();
        assert_eq!(entry.latest.as_ref().unwrap().id, newer.id);
        let entry = overview.iter().find(|e| e.vehicle_id == fresh.id).unwrap();
        assert!(entry.latest.is_none());
    }
}
