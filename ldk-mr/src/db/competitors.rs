//! Competitor dealers, their listings and listing price history

use chrono::{DateTime, Duration, Utc};
use ldk_common::api::{Page, PageQuery};
use ldk_common::db::parse_uuid;
use ldk_common::db::vehicles::load_vehicle;
use ldk_common::models::Vehicle;
use ldk_common::time::{days_between, from_db, from_db_opt, to_db};
use ldk_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const LISTING_COLUMNS: &str = "id, competitor_id, fingerprint, vin, year, make, model, trim, \
     mileage, price, url, platforms, first_seen_at, last_seen_at, removed_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Competitor {
    pub id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompetitorSummary {
    #[serde(flatten)]
    pub competitor: Competitor,
    pub active_listings: i64,
    pub removed_listings: i64,
}

/// A competitor's vehicle, merged across the platforms it was seen on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitorListing {
    pub id: Uuid,
    pub competitor_id: Uuid,
    pub fingerprint: String,
    pub vin: Option<String>,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub mileage: Option<i64>,
    pub price: Option<i64>,
    pub url: Option<String>,
    pub platforms: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl CompetitorListing {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Days on market: first sighting to removal, or to `now` while active
    pub fn dom(&self, now: DateTime<Utc>) -> i64 {
        days_between(self.first_seen_at, self.removed_at.unwrap_or(now))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: CompetitorListing,
    pub competitor_name: String,
    pub dom: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub price: i64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub competitor_id: Option<Uuid>,
    pub active_only: bool,
    pub make: Option<String>,
    pub model: Option<String>,
}

fn row_to_competitor(row: &SqliteRow) -> Result<Competitor> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(Competitor {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        website: row.get("website"),
        created_at: from_db(&created_at)?,
    })
}

fn row_to_listing(row: &SqliteRow) -> Result<CompetitorListing> {
    let id: String = row.get("id");
    let competitor_id: String = row.get("competitor_id");
    let platforms: String = row.get("platforms");
    let first_seen_at: String = row.get("first_seen_at");
    let last_seen_at: String = row.get("last_seen_at");

    Ok(CompetitorListing {
        id: parse_uuid(&id)?,
        competitor_id: parse_uuid(&competitor_id)?,
        fingerprint: row.get("fingerprint"),
        vin: row.get("vin"),
        year: row.get("year"),
        make: row.get("make"),
        model: row.get("model"),
        trim: row.get("trim"),
        mileage: row.get("mileage"),
        price: row.get("price"),
        url: row.get("url"),
        platforms: serde_json::from_str(&platforms)?,
        first_seen_at: from_db(&first_seen_at)?,
        last_seen_at: from_db(&last_seen_at)?,
        removed_at: from_db_opt(row.get("removed_at"))?,
    })
}

/// Find a competitor by name (case-insensitive) or create it
///
/// A non-empty `website` replaces the stored one.
pub async fn upsert_competitor(
    conn: &mut SqliteConnection,
    name: &str,
    website: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Competitor> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Competitor name is required".to_string()));
    }
    let website = website.map(str::trim).filter(|w| !w.is_empty());

    let existing = sqlx::query(
        "SELECT id, name, website, created_at FROM competitors WHERE name = ? COLLATE NOCASE",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = existing {
        let mut competitor = row_to_competitor(&row)?;
        if let Some(website) = website {
            if competitor.website.as_deref() != Some(website) {
                sqlx::query("UPDATE competitors SET website = ? WHERE id = ?")
                    .bind(website)
                    .bind(competitor.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                competitor.website = Some(website.to_string());
            }
        }
        return Ok(competitor);
    }

    let competitor = Competitor {
        id: Uuid::new_v4(),
        name: name.to_string(),
        website: website.map(str::to_string),
        created_at: now,
    };
    sqlx::query("INSERT INTO competitors (id, name, website, created_at) VALUES (?, ?, ?, ?)")
        .bind(competitor.id.to_string())
        .bind(&competitor.name)
        .bind(&competitor.website)
        .bind(to_db(&competitor.created_at))
        .execute(&mut *conn)
        .await?;
    tracing::info!(competitor = %competitor.name, "Registered new competitor");
    Ok(competitor)
}

pub async fn load_listing_by_fingerprint<'e, E>(
    executor: E,
    competitor_id: Uuid,
    fingerprint: &str,
) -> Result<Option<CompetitorListing>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM competitor_listings WHERE competitor_id = ? AND fingerprint = ?",
        LISTING_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(competitor_id.to_string())
        .bind(fingerprint)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_listing).transpose()
}

pub async fn load_listing<'e, E>(executor: E, id: Uuid) -> Result<Option<CompetitorListing>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM competitor_listings WHERE id = ?", LISTING_COLUMNS);
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(executor).await?;
    row.as_ref().map(row_to_listing).transpose()
}

pub async fn insert_listing<'e, E>(executor: E, listing: &CompetitorListing) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO competitor_listings (
            id, competitor_id, fingerprint, vin, year, make, model, trim, mileage,
            price, url, platforms, first_seen_at, last_seen_at, removed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(listing.id.to_string())
    .bind(listing.competitor_id.to_string())
    .bind(&listing.fingerprint)
    .bind(&listing.vin)
    .bind(listing.year)
    .bind(&listing.make)
    .bind(&listing.model)
    .bind(&listing.trim)
    .bind(listing.mileage)
    .bind(listing.price)
    .bind(&listing.url)
    .bind(serde_json::to_string(&listing.platforms)?)
    .bind(to_db(&listing.first_seen_at))
    .bind(to_db(&listing.last_seen_at))
    .bind(listing.removed_at.as_ref().map(to_db))
    .execute(executor)
    .await
    .map_err(|e| Error::from_unique_violation(e, "Competitor listing"))?;
    Ok(())
}

/// Write back every mutable column
pub async fn update_listing<'e, E>(executor: E, listing: &CompetitorListing) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE competitor_listings
        SET vin = ?, trim = ?, mileage = ?, price = ?, url = ?, platforms = ?,
            last_seen_at = ?, removed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&listing.vin)
    .bind(&listing.trim)
    .bind(listing.mileage)
    .bind(listing.price)
    .bind(&listing.url)
    .bind(serde_json::to_string(&listing.platforms)?)
    .bind(to_db(&listing.last_seen_at))
    .bind(listing.removed_at.as_ref().map(to_db))
    .bind(listing.id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn record_price<'e, E>(
    executor: E,
    listing_id: Uuid,
    price: i64,
    observed_at: DateTime<Utc>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO competitor_price_history (listing_id, price, observed_at) VALUES (?, ?, ?)",
    )
    .bind(listing_id.to_string())
    .bind(price)
    .bind(to_db(&observed_at))
    .execute(executor)
        .await?;
    Ok(())
}

/// Active listings of a competitor
pub async fn active_listings<'e, E>(
    executor: E,
    competitor_id: Uuid,
) -> Result<Vec<CompetitorListing>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM competitor_listings WHERE competitor_id = ? AND removed_at IS NULL",
        LISTING_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(competitor_id.to_string())
        .fetch_all(executor)
        .await?;
    rows.iter().map(row_to_listing).collect()
}

/// Our available vehicles a competitor listing competes with
///
/// Same make and model (case-insensitive) and a model year within `year_window`.
pub async fn matching_vehicles(
    conn: &mut SqliteConnection,
    make: &str,
    model: &str,
    year: i32,
    year_window: i32,
) -> Result<Vec<Vehicle>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM vehicles
        WHERE status = 'available'
          AND make = ? COLLATE NOCASE
          AND model = ? COLLATE NOCASE
          AND year BETWEEN ? AND ?
        ORDER BY COALESCE(listed_at, created_at) ASC, id ASC
        "#,
    )
    .bind(make.trim())
    .bind(model.trim())
    .bind(year.saturating_sub(year_window))
    .bind(year.saturating_add(year_window))
    .fetch_all(&mut *conn)
    .await?;

    let mut vehicles = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(vehicle) = load_vehicle(&mut *conn, parse_uuid(&id)?).await? {
            vehicles.push(vehicle);
        }
    }
    Ok(vehicles)
}

/// Competitors with their active and removed listing counts, by name
pub async fn list_competitors(pool: &SqlitePool) -> Result<Vec<CompetitorSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.name, c.website, c.created_at,
               COALESCE(SUM(CASE WHEN l.id IS NOT NULL AND l.removed_at IS NULL
                                 THEN 1 ELSE 0 END), 0) AS active_listings,
               COALESCE(SUM(CASE WHEN l.removed_at IS NOT NULL
                                 THEN 1 ELSE 0 END), 0) AS removed_listings
        FROM competitors c
        LEFT JOIN competitor_listings l ON l.competitor_id = c.id
        GROUP BY c.id
        ORDER BY c.name COLLATE NOCASE ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CompetitorSummary {
                competitor: row_to_competitor(row)?,
                active_listings: row.get("active_listings"),
                removed_listings: row.get("removed_listings"),
            })
        })
        .collect()
}

fn push_listing_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ListingFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(competitor_id) = filter.competitor_id {
        builder.push(" AND l.competitor_id = ").push_bind(competitor_id.to_string());
    }
    if filter.active_only {
        builder.push(" AND l.removed_at IS NULL");
    }
    if let Some(make) = filter.make.as_deref() {
        builder.push(" AND l.make = ").push_bind(make.trim().to_string()).push(" COLLATE NOCASE");
    }
    if let Some(model) = filter.model.as_deref() {
        builder.push(" AND l.model = ").push_bind(model.trim().to_string()).push(" COLLATE NOCASE");
    }
}

/// Most recently seen first
pub async fn list_listings(
    pool: &SqlitePool,
    filter: &ListingFilter,
    page: PageQuery,
    now: DateTime<Utc>,
) -> Result<Page<ListingView>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM competitor_listings l");
    push_listing_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let pagination = page.paginate(total);

    let columns = LISTING_COLUMNS
        .split(", ")
        .map(|c| format!("l.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut select = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {}, c.name AS competitor_name \
         FROM competitor_listings l JOIN competitors c ON c.id = l.competitor_id",
        columns
    ));
    push_listing_filter(&mut select, filter);
    select
        .push(" ORDER BY l.last_seen_at DESC, l.id ASC LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let items = rows
        .iter()
        .map(|row| {
            let listing = row_to_listing(row)?;
            Ok(ListingView {
                dom: listing.dom(now),
                competitor_name: row.get("competitor_name"),
                listing,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, &pagination))
}

/// Observed prices of a listing, oldest first
pub async fn listing_history(pool: &SqlitePool, listing_id: Uuid) -> Result<Vec<PricePoint>> {
    if load_listing(pool, listing_id).await?.is_none() {
        return Err(Error::NotFound(format!("Competitor listing {}", listing_id)));
    }

    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT price, observed_at FROM competitor_price_history \
         WHERE listing_id = ? ORDER BY observed_at ASC, id ASC",
    )
    .bind(listing_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(price, observed_at)| {
            Ok(PricePoint {
                price,
                observed_at: from_db(&observed_at)?,
            })
        })
        .collect()
}

/// Mark active listings not seen for `stale_days` as removed
pub async fn sweep_stale(pool: &SqlitePool, now: DateTime<Utc>, stale_days: i64) -> Result<u64> {
    let cutoff = Duration::try_days(stale_days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            Error::Config(format!("competitor_stale_days of {} is out of range", stale_days))
        })?;
    let removed = sqlx::query(
        "UPDATE competitor_listings SET removed_at = ? \
         WHERE removed_at IS NULL AND last_seen_at < ?",
    )
    .bind(to_db(&now))
    .bind(to_db(&cutoff))
    .execute(pool)
    .await?
    .rows_affected();
    if removed > 0 {
        tracing::info!("Marked {} stale competitor listing(s) removed", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldk_common::db::init_memory_database;

    fn listing(competitor_id: Uuid, fingerprint: &str, seen: DateTime<Utc>) -> CompetitorListing {
        CompetitorListing {
            id: Uuid::new_v4(),
            competitor_id,
            fingerprint: fingerprint.to_string(),
            vin: None,
            year: 2019,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            trim: None,
            mileage: Some(30_000),
            price: Some(21_000),
            url: None,
            platforms: vec!["website".to_string()],
            first_seen_at: seen,
            last_seen_at: seen,
            removed_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_competitor_is_case_insensitive() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        let first = upsert_competitor(&mut conn, "Main Street Motors", None, now).await.unwrap();
        let again =
            upsert_competitor(&mut conn, " main street motors ", Some("https://msm.example"), now)
                .await
                .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.website.as_deref(), Some("https://msm.example"));
        assert!(upsert_competitor(&mut conn, "  ", None, now).await.is_err());
    }

    #[tokio::test]
    async fn test_listings_filter_and_counts() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();
        let competitor = {
            let mut conn = pool.acquire().await.unwrap();
            upsert_competitor(&mut conn, "Lakeside Auto", None, now).await.unwrap()
        };

        let active = listing(competitor.id, "a", now - Duration::days(12));
        let mut removed = listing(competitor.id, "b", now - Duration::days(20));
        removed.make = "Honda".to_string();
        removed.removed_at = Some(now - Duration::days(5));
        insert_listing(&pool, &active).await.unwrap();
        insert_listing(&pool, &removed).await.unwrap();

        let summaries = list_competitors(&pool).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].active_listings, 1);
        assert_eq!(summaries[0].removed_listings, 1);

        let all = list_listings(&pool, &ListingFilter::default(), PageQuery::default(), now)
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        let removed_view = all.items.iter().find(|v| v.listing.id == removed.id).unwrap();
        assert_eq!(removed_view.dom, 15);
        assert_eq!(removed_view.competitor_name, "Lakeside Auto");

        let filter = ListingFilter {
            active_only: true,
            make: Some("toyota".to_string()),
            ..Default::default()
        };
        let page = list_listings(&pool, &filter, PageQuery::default(), now).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].dom, 12);
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_conflicts() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();
        let competitor = {
            let mut conn = pool.acquire().await.unwrap();
            upsert_competitor(&mut conn, "Lakeside Auto", None, now).await.unwrap()
        };
        insert_listing(&pool, &listing(competitor.id, "same", now)).await.unwrap();
        let err = insert_listing(&pool, &listing(competitor.id, "same", now)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_history_and_sweep() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();
        let competitor = {
            let mut conn = pool.acquire().await.unwrap();
            upsert_competitor(&mut conn, "Lakeside Auto", None, now).await.unwrap()
        };
        let stale = listing(competitor.id, "stale", now - Duration::days(10));
        let fresh = listing(competitor.id, "fresh", now - Duration::days(1));
        insert_listing(&pool, &stale).await.unwrap();
        insert_listing(&pool, &fresh).await.unwrap();
        record_price(&pool, stale.id, 21_000, now - Duration::days(10)).await.unwrap();
        record_price(&pool, stale.id, 19_500, now - Duration::days(9)).await.unwrap();

        let history = listing_history(&pool, stale.id).await.unwrap();
        assert_eq!(history.iter().map(|p| p.price).collect::<Vec<_>>(), vec![21_000, 19_500]);
        assert!(matches!(
            listing_history(&pool, Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));

        assert_eq!(sweep_stale(&pool, now, 7).await.unwrap(), 1);
        assert_eq!(sweep_stale(&pool, now, 7).await.unwrap(), 0);
        let reloaded = load_listing(&pool, stale.id).await.unwrap().unwrap();
        assert_eq!(reloaded.removed_at, Some(now).map(|t| from_db(&to_db(&t)).unwrap()));
        assert!(load_listing(&pool, fresh.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_sweep_rejects_out_of_range_age() {
        let pool = init_memory_database().await.unwrap();
        let err = sweep_stale(&pool, Utc::now(), i64::MAX).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_matching_vehicles_with_huge_window() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let found = matching_vehicles(&mut conn, "Toyota", "Camry", 2019, i32::MAX).await.unwrap();
        assert!(found.is_empty());
    }
}
