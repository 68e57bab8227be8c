//! Vehicle persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::types::{Page, PageQuery};
use crate::db::parse_uuid;
use crate::models::{Vehicle, VehicleSource, VehicleStatus};
use crate::time::{from_db, from_db_opt, to_db};
use crate::{Error, Result};

const VEHICLE_COLUMNS: &str = "id, stock_number, vin, year, make, model, trim, body_style, \
     exterior_color, interior_color, mileage, price, cost, status, source, description, \
     photo_urls, listed_at, sold_at, created_at, updated_at";

/// List filters; all optional and combined with AND
#[derive(Debug, Clone, Default)]
pub struct VehicleFilter {
    pub status: Option<VehicleStatus>,
    /// Case-insensitive exact make
    pub make: Option<String>,
    /// Substring over stock number, VIN, make and model
    pub q: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

/// Whitelisted sort columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VehicleSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    ListedAt,
    Price,
    Year,
    Mileage,
    StockNumber,
}

impl VehicleSort {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "created_at" => Ok(VehicleSort::CreatedAt),
            "updated_at" => Ok(VehicleSort::UpdatedAt),
            "listed_at" => Ok(VehicleSort::ListedAt),
            "price" => Ok(VehicleSort::Price),
            "year" => Ok(VehicleSort::Year),
            "mileage" => Ok(VehicleSort::Mileage),
            "stock_number" => Ok(VehicleSort::StockNumber),
            other => Err(Error::InvalidInput(format!("Cannot sort by '{}'", other))),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            VehicleSort::CreatedAt => "created_at",
            VehicleSort::UpdatedAt => "updated_at",
            VehicleSort::ListedAt => "listed_at",
            VehicleSort::Price => "price",
            VehicleSort::Year => "year",
            VehicleSort::Mileage => "mileage",
            VehicleSort::StockNumber => "stock_number",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::InvalidInput(format!("Unknown sort order '{}'", other))),
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

fn row_to_vehicle(row: &SqliteRow) -> Result<Vehicle> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let source: String = row.get("source");
    let photo_urls: String = row.get("photo_urls");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Vehicle {
        id: parse_uuid(&id)?,
        stock_number: row.get("stock_number"),
        vin: row.get("vin"),
        year: row.get("year"),
        make: row.get("make"),
        model: row.get("model"),
        trim: row.get("trim"),
        body_style: row.get("body_style"),
        exterior_color: row.get("exterior_color"),
        interior_color: row.get("interior_color"),
        mileage: row.get("mileage"),
        price: row.get("price"),
        cost: row.get("cost"),
        status: status.parse()?,
        source: source.parse::<VehicleSource>()?,
        description: row.get("description"),
        photo_urls: serde_json::from_str(&photo_urls)?,
        listed_at: from_db_opt(row.get("listed_at"))?,
        sold_at: from_db_opt(row.get("sold_at"))?,
        created_at: from_db(&created_at)?,
        updated_at: from_db(&updated_at)?,
    })
}

/// Translate UNIQUE violations on vehicles into a readable conflict
fn vehicle_conflict(err: sqlx::Error, vehicle: &Vehicle) -> Error {
    let message = match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            db_err.message().to_string()
        }
        _ => return Error::Database(err),
    };
    if message.contains("vehicles.vin") {
        Error::Conflict(format!("Vehicle with VIN {} already exists", vehicle.vin))
    } else if message.contains("vehicles.stock_number") {
        Error::Conflict(format!("Stock number {} already in use", vehicle.stock_number))
    } else {
        Error::from_unique_violation(err, "Vehicle")
    }
}

pub async fn insert_vehicle<'e, E>(executor: E, vehicle: &Vehicle) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO vehicles (id, stock_number, vin, year, make, model, trim, body_style,
            exterior_color, interior_color, mileage, price, cost, status, source, description,
            photo_urls, listed_at, sold_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(vehicle.id.to_string())
    .bind(&vehicle.stock_number)
    .bind(&vehicle.vin)
    .bind(vehicle.year)
    .bind(&vehicle.make)
    .bind(&vehicle.model)
    .bind(&vehicle.trim)
    .bind(&vehicle.body_style)
    .bind(&vehicle.exterior_color)
    .bind(&vehicle.interior_color)
    .bind(vehicle.mileage)
    .bind(vehicle.price)
    .bind(vehicle.cost)
    .bind(vehicle.status.as_str())
    .bind(vehicle.source.as_str())
    .bind(&vehicle.description)
    .bind(serde_json::to_string(&vehicle.photo_urls)?)
    .bind(vehicle.listed_at.as_ref().map(to_db))
    .bind(vehicle.sold_at.as_ref().map(to_db))
    .bind(to_db(&vehicle.created_at))
    .bind(to_db(&vehicle.updated_at))
    .execute(executor)
    .await
    .map_err(|e| vehicle_conflict(e, vehicle))?;

    Ok(())
}

/// Overwrite every mutable column of an existing vehicle
pub async fn update_vehicle<'e, E>(executor: E, vehicle: &Vehicle) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let updated = sqlx::query(
        r#"
        UPDATE vehicles SET
            stock_number = ?, vin = ?, year = ?, make = ?, model = ?, trim = ?, body_style = ?,
            exterior_color = ?, interior_color = ?, mileage = ?, price = ?, cost = ?, status = ?,
            source = ?, description = ?, photo_urls = ?, listed_at = ?, sold_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&vehicle.stock_number)
    .bind(&vehicle.vin)
    .bind(vehicle.year)
    .bind(&vehicle.make)
    .bind(&vehicle.model)
    .bind(&vehicle.trim)
    .bind(&vehicle.body_style)
    .bind(&vehicle.exterior_color)
    .bind(&vehicle.interior_color)
    .bind(vehicle.mileage)
    .bind(vehicle.price)
    .bind(vehicle.cost)
    .bind(vehicle.status.as_str())
    .bind(vehicle.source.as_str())
    .bind(&vehicle.description)
    .bind(serde_json::to_string(&vehicle.photo_urls)?)
    .bind(vehicle.listed_at.as_ref().map(to_db))
    .bind(vehicle.sold_at.as_ref().map(to_db))
    .bind(to_db(&vehicle.updated_at))
    .bind(vehicle.id.to_string())
    .execute(executor)
    .await
    .map_err(|e| vehicle_conflict(e, vehicle))?
    .rows_affected();

    if updated == 0 {
        return Err(Error::NotFound(format!("Vehicle {}", vehicle.id)));
    }
    Ok(())
}

pub async fn load_vehicle<'e, E>(executor: E, id: Uuid) -> Result<Option<Vehicle>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM vehicles WHERE id = ?", VEHICLE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_vehicle).transpose()
}

/// Load or fail with `NotFound`
pub async fn require_vehicle(pool: &SqlitePool, id: Uuid) -> Result<Vehicle> {
    load_vehicle(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Vehicle {}", id)))
}

pub async fn load_vehicle_by_vin<'e, E>(executor: E, vin: &str) -> Result<Option<Vehicle>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM vehicles WHERE vin = ?", VEHICLE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(vin.to_ascii_uppercase())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_vehicle).transpose()
}

/// Delete a vehicle; returns false when it did not exist
pub async fn delete_vehicle(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM vehicles WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted > 0)
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &VehicleFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(make) = filter.make.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        builder.push(" AND make = ").push_bind(make.to_string()).push(" COLLATE NOCASE");
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q.to_lowercase());
        builder
            .push(" AND (LOWER(stock_number) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(vin) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(make) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(model) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(min) = filter.min_price {
        builder.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        builder.push(" AND price <= ").push_bind(max);
    }
}

/// Filtered, sorted, paginated vehicle list
pub async fn list_vehicles(
    pool: &SqlitePool,
    filter: &VehicleFilter,
    sort: VehicleSort,
    order: SortOrder,
    page: PageQuery,
) -> Result<Page<Vehicle>> {
    if let (Some(min), Some(max)) = (filter.min_price, filter.max_price) {
        if min > max {
            return Err(Error::InvalidInput("min_price is greater than max_price".to_string()));
        }
    }

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM vehicles");
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let pagination = page.paginate(total);

    let mut select =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM vehicles", VEHICLE_COLUMNS));
    push_filter(&mut select, filter);
    // id as tiebreaker keeps paging stable
    select.push(format!(" ORDER BY {} {}, id ASC", sort.column(), order.sql()));
    select
        .push(" LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let items = rows.iter().map(row_to_vehicle).collect::<Result<Vec<_>>>()?;

    Ok(Page::new(items, total, &pagination))
}

/// Vehicle count per status, with zero for statuses that have none
pub async fn count_by_status(pool: &SqlitePool) -> Result<BTreeMap<String, i64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM vehicles GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut counts: BTreeMap<String, i64> = VehicleStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (status, count) in rows {
        counts.insert(status, count);
    }
    Ok(counts)
}

/// Every vehicle currently `available`, oldest listing first
pub async fn list_available_vehicles(pool: &SqlitePool) -> Result<Vec<Vehicle>> {
    let sql = format!(
        "SELECT {} FROM vehicles WHERE status = 'available' \
         ORDER BY COALESCE(listed_at, created_at) ASC",
        VEHICLE_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_vehicle).collect()
}
