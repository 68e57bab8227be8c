//! Consignment submission persistence and review

use chrono::{DateTime, Utc};
use ldk_common::api::{Page, PageQuery};
use ldk_common::db::parse_uuid;
use ldk_common::db::vehicles::{insert_vehicle, load_vehicle_by_vin, update_vehicle};
use ldk_common::models::{
    ConsignmentStatus, ConsignmentSubmission, NewVehicle, Vehicle, VehicleSource, VehicleStatus,
};
use ldk_common::time::{from_db, from_db_opt, to_db};
use ldk_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;
use uuid::Uuid;

const CONSIGNMENT_COLUMNS: &str = "id, owner_name, owner_email, owner_phone, vin, year, make, \
     model, trim, mileage, asking_price, condition, notes, photo_urls, status, review_note, \
     vehicle_id, submitted_at, reviewed_at";

fn row_to_consignment(row: &SqliteRow) -> Result<ConsignmentSubmission> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let photo_urls: String = row.get("photo_urls");
    let vehicle_id: Option<String> = row.get("vehicle_id");
    let submitted_at: String = row.get("submitted_at");

    Ok(ConsignmentSubmission {
        id: parse_uuid(&id)?,
        owner_name: row.get("owner_name"),
        owner_email: row.get("owner_email"),
        owner_phone: row.get("owner_phone"),
        vin: row.get("vin"),
        year: row.get("year"),
        make: row.get("make"),
        model: row.get("model"),
        trim: row.get("trim"),
        mileage: row.get("mileage"),
        asking_price: row.get("asking_price"),
        condition: row.get("condition"),
        notes: row.get("notes"),
        photo_urls: serde_json::from_str(&photo_urls)?,
        status: status.parse()?,
        review_note: row.get("review_note"),
        vehicle_id: vehicle_id.as_deref().map(parse_uuid).transpose()?,
        submitted_at: from_db(&submitted_at)?,
        reviewed_at: from_db_opt(row.get("reviewed_at"))?,
    })
}

/// Store a new submission
///
/// Fails with `Conflict` when the VIN already has a pending submission or a
/// vehicle in inventory that is not archived.
pub async fn insert_consignment(pool: &SqlitePool, sub: &ConsignmentSubmission) -> Result<()> {
    if has_pending_for_vin(pool, &sub.vin).await? {
        return Err(Error::Conflict(format!(
            "A consignment for VIN {} is already pending review",
            sub.vin
        )));
    }
    if let Some(vehicle) = load_vehicle_by_vin(pool, &sub.vin).await? {
        if vehicle.status != VehicleStatus::Archived {
            return Err(Error::Conflict(format!("VIN {} is already in inventory", sub.vin)));
        }
    }

    sqlx::query(
        r#"
        INSERT INTO consignments (id, owner_name, owner_email, owner_phone, vin, year, make, model,
            trim, mileage, asking_price, condition, notes, photo_urls, status, review_note,
            vehicle_id, submitted_at, reviewed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(sub.id.to_string())
    .bind(&sub.owner_name)
    .bind(&sub.owner_email)
    .bind(&sub.owner_phone)
    .bind(&sub.vin)
    .bind(sub.year)
    .bind(&sub.make)
    .bind(&sub.model)
    .bind(&sub.trim)
    .bind(sub.mileage)
    .bind(sub.asking_price)
    .bind(&sub.condition)
    .bind(&sub.notes)
    .bind(serde_json::to_string(&sub.photo_urls)?)
    .bind(sub.status.as_str())
    .bind(&sub.review_note)
    .bind(sub.vehicle_id.map(|id| id.to_string()))
    .bind(to_db(&sub.submitted_at))
    .bind(sub.reviewed_at.as_ref().map(to_db))
    .execute(pool)
    .await
    // Concurrent submissions race past the check above; the partial index catches them
    .map_err(|e| {
        Error::from_unique_violation(e, &format!("Pending consignment for VIN {}", sub.vin))
    })?;

    Ok(())
}

pub async fn load_consignment<'e, E>(executor: E, id: Uuid) -> Result<Option<ConsignmentSubmission>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM consignments WHERE id = ?", CONSIGNMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_consignment).transpose()
}

pub async fn require_consignment(pool: &SqlitePool, id: Uuid) -> Result<ConsignmentSubmission> {
    load_consignment(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Consignment {}", id)))
}

pub async fn has_pending_for_vin(pool: &SqlitePool, vin: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM consignments WHERE vin = ? AND status = 'pending')",
    )
    .bind(vin)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn count_pending(pool: &SqlitePool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM consignments WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

fn push_status_filter(builder: &mut QueryBuilder<'_, Sqlite>, status: Option<ConsignmentStatus>) {
    if let Some(status) = status {
        builder.push(" WHERE status = ").push_bind(status.as_str());
    }
}

/// Newest submissions first, optionally narrowed to one status
pub async fn list_consignments(
    pool: &SqlitePool,
    status: Option<ConsignmentStatus>,
    page: PageQuery,
) -> Result<Page<ConsignmentSubmission>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM consignments");
    push_status_filter(&mut count, status);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let pagination = page.paginate(total);

    let mut select =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM consignments", CONSIGNMENT_COLUMNS));
    push_status_filter(&mut select, status);
    select
        .push(" ORDER BY submitted_at DESC, id ASC LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let items = rows.iter().map(row_to_consignment).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, &pagination))
}

/// Persist a review decision; only a still-pending row is updated
async fn mark_reviewed<'e, E>(executor: E, sub: &ConsignmentSubmission) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let updated = sqlx::query(
        r#"
        UPDATE consignments
        SET status = ?, review_note = ?, vehicle_id = ?, reviewed_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(sub.status.as_str())
    .bind(&sub.review_note)
    .bind(sub.vehicle_id.map(|id| id.to_string()))
    .bind(sub.reviewed_at.as_ref().map(to_db))
    .bind(sub.id.to_string())
    .execute(executor)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(Error::Conflict(format!("Consignment {} was already reviewed", sub.id)));
    }
    Ok(())
}

/// Approval form
#[derive(Debug, Clone, Deserialize)]
pub struct ApproveConsignment {
    pub stock_number: String,
    /// Defaults to the owner's asking price
    pub price: Option<i64>,
    pub note: Option<String>,
}

/// Result of approving a submission
#[derive(Debug, Clone)]
pub struct Approval {
    pub submission: ConsignmentSubmission,
    pub vehicle: Vehicle,
    /// An archived vehicle with the same VIN was brought back as a draft
    pub reactivated: bool,
}

/// Approve a pending submission and create its draft vehicle, atomically
///
/// VINs are unique in inventory, so an archived vehicle with the submitted
/// VIN is reused: it goes back to `draft` with the submission's details.
pub async fn approve_consignment(
    pool: &SqlitePool,
    id: Uuid,
    form: ApproveConsignment,
    now: DateTime<Utc>,
) -> Result<Approval> {
    let mut tx = pool.begin().await?;

    let mut sub = load_consignment(&mut *tx, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Consignment {}", id)))?;
    sub.ensure_reviewable()?;

    let price = form.price.unwrap_or(sub.asking_price);
    let existing = load_vehicle_by_vin(&mut *tx, &sub.vin).await?;

    let (vehicle, reactivated) = match existing {
        Some(mut vehicle) if vehicle.status == VehicleStatus::Archived => {
            // Reuse validation from the create path before touching the row
            let fresh = consignment_vehicle(&sub, &form.stock_number, price, now)?;
            vehicle.transition_to(VehicleStatus::Draft, now)?;
            vehicle.stock_number = fresh.stock_number;
            vehicle.year = fresh.year;
            vehicle.make = fresh.make;
            vehicle.model = fresh.model;
            vehicle.trim = fresh.trim;
            vehicle.mileage = fresh.mileage;
            vehicle.price = fresh.price;
            vehicle.cost = None;
            vehicle.source = VehicleSource::Consignment;
            vehicle.description = fresh.description;
            vehicle.photo_urls = fresh.photo_urls;
            vehicle.listed_at = None;
            update_vehicle(&mut *tx, &vehicle).await?;
            (vehicle, true)
        }
        Some(vehicle) => {
            return Err(Error::Conflict(format!(
                "VIN {} is already in inventory as {} ({})",
                sub.vin, vehicle.stock_number, vehicle.status
            )));
        }
        None => {
            let vehicle = consignment_vehicle(&sub, &form.stock_number, price, now)?;
            insert_vehicle(&mut *tx, &vehicle).await?;
            (vehicle, false)
        }
    };

    sub.status = ConsignmentStatus::Approved;
    sub.review_note = clean_note(form.note);
    sub.vehicle_id = Some(vehicle.id);
    sub.reviewed_at = Some(now);
    mark_reviewed(&mut *tx, &sub).await?;

    tx.commit().await?;

    info!(
        consignment_id = %sub.id,
        vehicle_id = %vehicle.id,
        reactivated,
        "Consignment approved"
    );
    Ok(Approval {
        submission: sub,
        vehicle,
        reactivated,
    })
}

/// Reject a pending submission; a note for the owner is required
pub async fn reject_consignment(
    pool: &SqlitePool,
    id: Uuid,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<ConsignmentSubmission> {
    let note = clean_note(note)
        .ok_or_else(|| Error::InvalidInput("A rejection note is required".to_string()))?;

    let mut sub = require_consignment(pool, id).await?;
    sub.ensure_reviewable()?;

    sub.status = ConsignmentStatus::Rejected;
    sub.review_note = Some(note);
    sub.reviewed_at = Some(now);
    mark_reviewed(pool, &sub).await?;

    info!(consignment_id = %sub.id, "Consignment rejected");
    Ok(sub)
}

fn consignment_vehicle(
    sub: &ConsignmentSubmission,
    stock_number: &str,
    price: i64,
    now: DateTime<Utc>,
) -> Result<Vehicle> {
    NewVehicle {
        stock_number: stock_number.to_string(),
        vin: sub.vin.clone(),
        year: sub.year,
        make: sub.make.clone(),
        model: sub.model.clone(),
        trim: sub.trim.clone(),
        body_style: None,
        exterior_color: None,
        interior_color: None,
        mileage: sub.mileage,
        price,
        cost: None,
        source: Some(VehicleSource::Consignment),
        description: sub.notes.clone(),
        photo_urls: sub.photo_urls.clone(),
    }
    .into_vehicle(now)
}

fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldk_common::db::init_memory_database;
    use ldk_common::db::vehicles::require_vehicle;
    use ldk_common::models::NewConsignment;

    fn form(vin: &str) -> NewConsignment {
        NewConsignment {
            owner_name: "Pat Doe".to_string(),
            owner_email: "pat@example.com".to_string(),
            owner_phone: None,
            vin: vin.to_string(),
            year: 2017,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            trim: Some("SE".to_string()),
            mileage: 64_000,
            asking_price: 14_500,
            condition: Some("clean".to_string()),
            notes: Some("One owner".to_string()),
            photo_urls: vec!["https://img.example/a.jpg".to_string()],
        }
    }

    async fn submit(pool: &SqlitePool, vin: &str) -> ConsignmentSubmission {
        let sub = form(vin).into_submission(Utc::now()).unwrap();
        insert_consignment(pool, &sub).await.unwrap();
        sub
    }

    fn approve_form(stock: &str) -> ApproveConsignment {
        ApproveConsignment {
            stock_number: stock.to_string(),
            price: None,
            note: Some("  ".to_string()),
        }
    }

    #[tokio::test]
    async fn test_second_pending_submission_for_vin_conflicts() {
        let pool = init_memory_database().await.unwrap();
        submit(&pool, "4T1BF1FK5HU123456").await;

        let dup = form("4t1bf1fk5hu123456").into_submission(Utc::now()).unwrap();
        let err = insert_consignment(&pool, &dup).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(count_pending(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_approve_creates_draft_vehicle() {
        let pool = init_memory_database().await.unwrap();
        let sub = submit(&pool, "4T1BF1FK5HU123456").await;

        let approval = approve_consignment(&pool, sub.id, approve_form("C-100"), Utc::now())
            .await
            .unwrap();

        assert!(!approval.reactivated);
        assert_eq!(approval.submission.status, ConsignmentStatus::Approved);
        assert_eq!(approval.submission.vehicle_id, Some(approval.vehicle.id));
        assert_eq!(approval.submission.review_note, None);

        let vehicle = require_vehicle(&pool, approval.vehicle.id).await.unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Draft);
        assert_eq!(vehicle.source, VehicleSource::Consignment);
        assert_eq!(vehicle.price, 14_500);
        assert_eq!(vehicle.photo_urls, sub.photo_urls);

        let stored = require_consignment(&pool, sub.id).await.unwrap();
        assert_eq!(stored.status, ConsignmentStatus::Approved);
        assert!(stored.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_approval_rolls_back() {
        let pool = init_memory_database().await.unwrap();
        let first = submit(&pool, "4T1BF1FK5HU123456").await;
        approve_consignment(&pool, first.id, approve_form("C-100"), Utc::now())
            .await
            .unwrap();

        // Different VIN, same stock number: vehicle insert fails
        let second = submit(&pool, "1HGCM82633A004352").await;
        let err = approve_consignment(&pool, second.id, approve_form("C-100"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = require_consignment(&pool, second.id).await.unwrap();
        assert_eq!(stored.status, ConsignmentStatus::Pending);
        assert!(stored.vehicle_id.is_none());
    }

    #[tokio::test]
    async fn test_approve_reuses_archived_vehicle() {
        let pool = init_memory_database().await.unwrap();
        let first = submit(&pool, "4T1BF1FK5HU123456").await;
        let approval = approve_consignment(&pool, first.id, approve_form("C-100"), Utc::now())
            .await
            .unwrap();

        let mut vehicle = approval.vehicle;
        vehicle.transition_to(VehicleStatus::Archived, Utc::now()).unwrap();
        update_vehicle(&pool, &vehicle).await.unwrap();

        let again = submit(&pool, "4T1BF1FK5HU123456").await;
        let mut form = approve_form("C-200");
        form.price = Some(13_900);
        let second = approve_consignment(&pool, again.id, form, Utc::now()).await.unwrap();

        assert!(second.reactivated);
        assert_eq!(second.vehicle.id, vehicle.id);
        let stored = require_vehicle(&pool, vehicle.id).await.unwrap();
        assert_eq!(stored.status, VehicleStatus::Draft);
        assert_eq!(stored.stock_number, "C-200");
        assert_eq!(stored.price, 13_900);
    }

    #[tokio::test]
    async fn test_reviewing_twice_conflicts() {
        let pool = init_memory_database().await.unwrap();
        let sub = submit(&pool, "4T1BF1FK5HU123456").await;

        let note = Some("Too many miles".to_string());
        let rejected = reject_consignment(&pool, sub.id, note, Utc::now())
            .await
            .unwrap();
        assert_eq!(rejected.status, ConsignmentStatus::Rejected);

        let err = approve_consignment(&pool, sub.id, approve_form("C-1"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = reject_consignment(&pool, sub.id, Some("again".to_string()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reject_requires_note() {
        let pool = init_memory_database().await.unwrap();
        let sub = submit(&pool, "4T1BF1FK5HU123456").await;
        let err = reject_consignment(&pool, sub.id, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let pool = init_memory_database().await.unwrap();
        let a = submit(&pool, "4T1BF1FK5HU123456").await;
        submit(&pool, "1HGCM82633A004352").await;
        reject_consignment(&pool, a.id, Some("no".to_string()), Utc::now())
            .await
            .unwrap();

        let pending =
            list_consignments(&pool, Some(ConsignmentStatus::Pending), PageQuery::default())
                .await
                .unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.items[0].vin, "1HGCM82633A004352");

        let all = list_consignments(&pool, None, PageQuery::default()).await.unwrap();
        assert_eq!(all.total, 2);
    }
}
