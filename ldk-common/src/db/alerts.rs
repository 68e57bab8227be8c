//! Alert persistence
//!
//! At most one open (unacknowledged) alert exists per kind and subject;
//! `raise_alert` enforces this.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::api::types::{Page, PageQuery};
use crate::db::parse_uuid;
use crate::models::{Alert, AlertKind, NewAlert};
use crate::time::{from_db, from_db_opt, to_db};
use crate::{Error, Result};

const ALERT_COLUMNS: &str = "id, vehicle_id, competitor_listing_id, kind, severity, message, data, \
     created_at, acknowledged_at";

/// What an alert is about, for duplicate suppression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSubject {
    Vehicle(Uuid),
    CompetitorListing(Uuid),
}

impl AlertSubject {
    /// Subject of a new alert (listing wins when both are set)
    pub fn of(alert: &NewAlert) -> Option<Self> {
        alert
            .competitor_listing_id
            .map(AlertSubject::CompetitorListing)
            .or(alert.vehicle_id.map(AlertSubject::Vehicle))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub only_open: bool,
    pub kind: Option<AlertKind>,
    pub vehicle_id: Option<Uuid>,
}

fn row_to_alert(row: &SqliteRow) -> Result<Alert> {
    let id: String = row.get("id");
    let vehicle_id: Option<String> = row.get("vehicle_id");
    let listing_id: Option<String> = row.get("competitor_listing_id");
    let kind: String = row.get("kind");
    let severity: String = row.get("severity");
    let data: String = row.get("data");
    let created_at: String = row.get("created_at");

    Ok(Alert {
        id: parse_uuid(&id)?,
        vehicle_id: vehicle_id.as_deref().map(parse_uuid).transpose()?,
        competitor_listing_id: listing_id.as_deref().map(parse_uuid).transpose()?,
        kind: kind.parse()?,
        severity: severity.parse()?,
        message: row.get("message"),
        data: serde_json::from_str(&data)?,
        created_at: from_db(&created_at)?,
        acknowledged_at: from_db_opt(row.get("acknowledged_at"))?,
    })
}

pub async fn insert_alert<'e, E>(executor: E, alert: &Alert) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO alerts (id, vehicle_id, competitor_listing_id, kind, severity, message, data,
                            created_at, acknowledged_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(alert.id.to_string())
    .bind(alert.vehicle_id.map(|id| id.to_string()))
    .bind(alert.competitor_listing_id.map(|id| id.to_string()))
    .bind(alert.kind.as_str())
    .bind(alert.severity.as_str())
    .bind(&alert.message)
    .bind(serde_json::to_string(&alert.data)?)
    .bind(to_db(&alert.created_at))
    .bind(alert.acknowledged_at.as_ref().map(to_db))
    .execute(executor)
    .await?;
    Ok(())
}

/// Whether an unacknowledged alert of `kind` exists for `subject`
pub async fn has_open_alert<'e, E>(
    executor: E,
    kind: AlertKind,
    subject: AlertSubject,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (column, id) = match subject {
        AlertSubject::Vehicle(id) => ("vehicle_id", id),
        AlertSubject::CompetitorListing(id) => ("competitor_listing_id", id),
    };
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM alerts WHERE kind = ? AND {} = ? AND acknowledged_at IS NULL)",
        column
    );
    let exists: bool = sqlx::query_scalar(&sql)
        .bind(kind.as_str())
        .bind(id.to_string())
        .fetch_one(executor)
        .await?;
    Ok(exists)
}

/// Store `new_alert` unless an open alert of the same kind and subject exists
///
/// Returns the stored alert, or `None` when suppressed.
pub async fn raise_alert(
    conn: &mut SqliteConnection,
    new_alert: NewAlert,
    now: DateTime<Utc>,
) -> Result<Option<Alert>> {
    if let Some(subject) = AlertSubject::of(&new_alert) {
        if has_open_alert(&mut *conn, new_alert.kind, subject).await? {
            tracing::debug!(
                kind = new_alert.kind.as_str(),
                ?subject,
                "Open alert exists, suppressing"
            );
            return Ok(None);
        }
    }
    let alert = new_alert.into_alert(now);
    insert_alert(&mut *conn, &alert).await?;
    Ok(Some(alert))
}

pub async fn load_alert(pool: &SqlitePool, id: Uuid) -> Result<Option<Alert>> {
    let sql = format!("SELECT {} FROM alerts WHERE id = ?", ALERT_COLUMNS);
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(pool).await?;
    row.as_ref().map(row_to_alert).transpose()
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AlertFilter) {
    builder.push(" WHERE 1 = 1");
    if filter.only_open {
        builder.push(" AND acknowledged_at IS NULL");
    }
    if let Some(kind) = filter.kind {
        builder.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(vehicle_id) = filter.vehicle_id {
        builder.push(" AND vehicle_id = ").push_bind(vehicle_id.to_string());
    }
}

/// Newest first
pub async fn list_alerts(
    pool: &SqlitePool,
    filter: &AlertFilter,
    page: PageQuery,
) -> Result<Page<Alert>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM alerts");
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let pagination = page.paginate(total);

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM alerts", ALERT_COLUMNS));
    push_filter(&mut select, filter);
    select
        .push(" ORDER BY created_at DESC, id ASC LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let items = rows.iter().map(row_to_alert).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, &pagination))
}

/// Mark an alert acknowledged; acknowledging twice keeps the first time
pub async fn acknowledge_alert(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<Alert> {
    sqlx::query("UPDATE alerts SET acknowledged_at = ? WHERE id = ? AND acknowledged_at IS NULL")
        .bind(to_db(&now))
        .bind(id.to_string())
        .execute(pool)
        .await?;

    load_alert(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Alert {}", id)))
}

pub async fn count_open_alerts(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE acknowledged_at IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::models::AlertSeverity;
    use chrono::Duration;

    async fn seed_vehicle(pool: &SqlitePool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO vehicles (id, stock_number, vin, year, make, model, created_at, updated_at)
            VALUES (?, 'A1', '11111111111111111', 2019, 'Ford', 'F-150',
                    '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')
            "#,
        )
        .bind(id.to_string())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    fn stale(vehicle_id: Uuid) -> NewAlert {
        NewAlert::for_vehicle(
            vehicle_id,
            AlertKind::StaleInventory,
            AlertSeverity::Warning,
            "On lot 75 days",
            serde_json::json!({"days_on_lot": 75}),
        )
    }

    #[tokio::test]
    async fn test_raise_suppresses_duplicate_open_alert() {
        let pool = init_memory_database().await.unwrap();
        let vehicle_id = seed_vehicle(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        let first = raise_alert(&mut conn, stale(vehicle_id), now).await.unwrap();
        assert!(first.is_some());
        assert!(raise_alert(&mut conn, stale(vehicle_id), now).await.unwrap().is_none());
        drop(conn);

        // Once acknowledged, a new one may be raised
        let first = first.unwrap();
        acknowledge_alert(&pool, first.id, now).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert!(raise_alert(&mut conn, stale(vehicle_id), now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        let vehicle_id = seed_vehicle(&pool).await;
        let alert = stale(vehicle_id).into_alert(Utc::now());
        insert_alert(&pool, &alert).await.unwrap();

        let t1 = Utc::now();
        let acked = acknowledge_alert(&pool, alert.id, t1).await.unwrap();
        let again = acknowledge_alert(&pool, alert.id, t1 + Duration::hours(1)).await.unwrap();
        assert_eq!(acked.acknowledged_at, again.acknowledged_at);

        assert!(matches!(
            acknowledge_alert(&pool, Uuid::new_v4(), t1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_open_and_kind() {
        let pool = init_memory_database().await.unwrap();
        let vehicle_id = seed_vehicle(&pool).await;
        let open = stale(vehicle_id).into_alert(Utc::now());
        let mut closed = NewAlert::for_vehicle(
            vehicle_id,
            AlertKind::MedianMoved,
            AlertSeverity::Info,
            "Median moved",
            serde_json::json!({}),
        )
        .into_alert(Utc::now());
        closed.acknowledged_at = Some(Utc::now());
        insert_alert(&pool, &open).await.unwrap();
        insert_alert(&pool, &closed).await.unwrap();

        let all = list_alerts(&pool, &AlertFilter::default(), PageQuery::default()).await.unwrap();
        assert_eq!(all.total, 2);

        let only_open = AlertFilter {
            only_open: true,
            ..Default::default()
        };
        let page = list_alerts(&pool, &only_open, PageQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].kind, AlertKind::StaleInventory);
        assert_eq!(count_open_alerts(&pool).await.unwrap(), 1);

        let by_kind = AlertFilter {
            kind: Some(AlertKind::MedianMoved),
            ..Default::default()
        };
        assert_eq!(list_alerts(&pool, &by_kind, PageQuery::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_deleting_vehicle_unlinks_alert() {
        let pool = init_memory_database().await.unwrap();
        let vehicle_id = seed_vehicle(&pool).await;
        let alert = stale(vehicle_id).into_alert(Utc::now());
        insert_alert(&pool, &alert).await.unwrap();

        sqlx::query("DELETE FROM vehicles WHERE id = ?")
            .bind(vehicle_id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let loaded = load_alert(&pool, alert.id).await.unwrap().unwrap();
        assert_eq!(loaded.vehicle_id, None);
    }
}
