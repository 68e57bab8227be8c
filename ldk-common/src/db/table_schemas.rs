//! Declared schemas for tables that have grown columns since first release
//!
//! Adding a column: append it here (nullable or with a DEFAULT) and to the
//! matching `CREATE TABLE` in `init.rs`. Existing databases pick it up on
//! the next start.

use crate::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

pub struct VehiclesTableSchema;

impl TableSchema for VehiclesTableSchema {
    fn table_name() -> &'static str {
        "vehicles"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("stock_number", "TEXT").not_null().unique(),
            ColumnDefinition::new("vin", "TEXT").not_null().unique(),
            ColumnDefinition::new("year", "INTEGER").not_null(),
            ColumnDefinition::new("make", "TEXT").not_null(),
            ColumnDefinition::new("model", "TEXT").not_null(),
            ColumnDefinition::new("trim", "TEXT"),
            ColumnDefinition::new("body_style", "TEXT"),
            ColumnDefinition::new("exterior_color", "TEXT"),
            ColumnDefinition::new("interior_color", "TEXT"),
            ColumnDefinition::new("mileage", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("price", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("cost", "INTEGER"),
            ColumnDefinition::new("status", "TEXT").not_null().default("'draft'"),
            ColumnDefinition::new("source", "TEXT").not_null().default("'purchase'"),
            ColumnDefinition::new("description", "TEXT"),
            ColumnDefinition::new("photo_urls", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("listed_at", "TEXT"),
            ColumnDefinition::new("sold_at", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
            ColumnDefinition::new("updated_at", "TEXT").not_null(),
        ]
    }
}

pub struct ConsignmentsTableSchema;

impl TableSchema for ConsignmentsTableSchema {
    fn table_name() -> &'static str {
        "consignments"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("owner_name", "TEXT").not_null(),
            ColumnDefinition::new("owner_email", "TEXT").not_null(),
            ColumnDefinition::new("owner_phone", "TEXT"),
            ColumnDefinition::new("vin", "TEXT").not_null(),
            ColumnDefinition::new("year", "INTEGER").not_null(),
            ColumnDefinition::new("make", "TEXT").not_null(),
            ColumnDefinition::new("model", "TEXT").not_null(),
            ColumnDefinition::new("trim", "TEXT"),
            ColumnDefinition::new("mileage", "INTEGER").not_null(),
            ColumnDefinition::new("asking_price", "INTEGER").not_null(),
            ColumnDefinition::new("condition", "TEXT"),
            ColumnDefinition::new("notes", "TEXT"),
            ColumnDefinition::new("photo_urls", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("status", "TEXT").not_null().default("'pending'"),
            ColumnDefinition::new("review_note", "TEXT"),
            ColumnDefinition::new("vehicle_id", "TEXT"),
            ColumnDefinition::new("submitted_at", "TEXT").not_null(),
            ColumnDefinition::new("reviewed_at", "TEXT"),
        ]
    }
}

pub struct MarketSnapshotsTableSchema;

impl TableSchema for MarketSnapshotsTableSchema {
    fn table_name() -> &'static str {
        "market_snapshots"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("vehicle_id", "TEXT").not_null(),
            ColumnDefinition::new("taken_at", "TEXT").not_null(),
            ColumnDefinition::new("source", "TEXT").not_null(),
            ColumnDefinition::new("cache_hit", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("our_price", "INTEGER").not_null(),
            ColumnDefinition::new("comp_count", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("min_price", "INTEGER"),
            ColumnDefinition::new("max_price", "INTEGER"),
            ColumnDefinition::new("median_price", "REAL"),
            ColumnDefinition::new("mean_price", "REAL"),
            ColumnDefinition::new("p25_price", "REAL"),
            ColumnDefinition::new("p75_price", "REAL"),
            ColumnDefinition::new("position", "TEXT").not_null().default("'unknown'"),
            ColumnDefinition::new("delta_dollars", "REAL"),
            ColumnDefinition::new("delta_pct", "REAL"),
            ColumnDefinition::new("percentile_rank", "REAL"),
        ]
    }
}

pub struct CompetitorListingsTableSchema;

impl TableSchema for CompetitorListingsTableSchema {
    fn table_name() -> &'static str {
        "competitor_listings"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("competitor_id", "TEXT").not_null(),
            ColumnDefinition::new("fingerprint", "TEXT").not_null(),
            ColumnDefinition::new("vin", "TEXT"),
            ColumnDefinition::new("year", "INTEGER").not_null(),
            ColumnDefinition::new("make", "TEXT").not_null(),
            ColumnDefinition::new("model", "TEXT").not_null(),
            ColumnDefinition::new("trim", "TEXT"),
            ColumnDefinition::new("mileage", "INTEGER"),
            ColumnDefinition::new("price", "INTEGER"),
            ColumnDefinition::new("url", "TEXT"),
            ColumnDefinition::new("platforms", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("first_seen_at", "TEXT").not_null(),
            ColumnDefinition::new("last_seen_at", "TEXT").not_null(),
            ColumnDefinition::new("removed_at", "TEXT"),
        ]
    }
}

/// Sync every declared table
pub async fn sync_all_table_schemas(pool: &SqlitePool) -> Result<()> {
    let added = SchemaSync::sync_table::<VehiclesTableSchema>(pool).await?
        + SchemaSync::sync_table::<ConsignmentsTableSchema>(pool).await?
        + SchemaSync::sync_table::<MarketSnapshotsTableSchema>(pool).await?
        + SchemaSync::sync_table::<CompetitorListingsTableSchema>(pool).await?;

    if added > 0 {
        info!("Schema sync added {} column(s)", added);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_old_vehicles_table_gains_columns() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        // First-release shape: no body_style, interior_color, description, photo_urls
        sqlx::query(
            r#"
            CREATE TABLE vehicles (
                id TEXT PRIMARY KEY,
                stock_number TEXT NOT NULL UNIQUE,
                vin TEXT NOT NULL UNIQUE,
                year INTEGER NOT NULL,
                make TEXT NOT NULL,
                model TEXT NOT NULL,
                trim TEXT,
                exterior_color TEXT,
                mileage INTEGER NOT NULL DEFAULT 0,
                price INTEGER NOT NULL DEFAULT 0,
                cost INTEGER,
                status TEXT NOT NULL DEFAULT 'draft',
                source TEXT NOT NULL DEFAULT 'purchase',
                listed_at TEXT,
                sold_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let added = SchemaSync::sync_table::<VehiclesTableSchema>(&pool).await.unwrap();
        assert_eq!(added, 4);

        let columns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('vehicles')")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(columns as usize, VehiclesTableSchema::expected_columns().len());
    }
}
