//! Versioned schema migrations
//!
//! Column additions are handled by schema sync; this module covers what
//! sync cannot do: indexes and data transformations. Each migration is
//! idempotent and recorded in `schema_version`. Never edit a released
//! migration, add a new one and bump `CURRENT_SCHEMA_VERSION`.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Bump when adding a migration
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Latest applied version, 0 for a fresh database
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(\
         SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply every pending migration in order
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({}); possible downgrade",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// v1: lookup indexes
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    const INDEXES: &[&str] = &[
        "CREATE INDEX IF NOT EXISTS idx_vehicles_status ON vehicles(status)",
        "CREATE INDEX IF NOT EXISTS idx_vehicles_make_model ON vehicles(make, model)",
        "CREATE INDEX IF NOT EXISTS idx_consignments_vin_status ON consignments(vin, status)",
        // One pending submission per VIN
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_consignments_pending_vin \
         ON consignments(vin) WHERE status = 'pending'",
        "CREATE INDEX IF NOT EXISTS idx_snapshots_vehicle_taken \
         ON market_snapshots(vehicle_id, taken_at)",
        "CREATE INDEX IF NOT EXISTS idx_market_listings_snapshot ON market_listings(snapshot_id)",
        "CREATE INDEX IF NOT EXISTS idx_comp_cache_expires ON comp_cache(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_competitor_listings_seen \
         ON competitor_listings(last_seen_at)",
        "CREATE INDEX IF NOT EXISTS idx_price_history_listing \
         ON competitor_price_history(listing_id, observed_at)",
        "CREATE INDEX IF NOT EXISTS idx_alerts_open ON alerts(kind, acknowledged_at)",
        "CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job, started_at)",
    ];

    for sql in INDEXES {
        sqlx::query(sql).execute(pool).await?;
    }
    info!("  Created {} indexes", INDEXES.len());
    Ok(())
}

/// v2: backfill `listed_at` for vehicles listed before the column was stamped
///
/// Days-on-lot falls back to `created_at`, so use that as the listing date.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE vehicles
        SET listed_at = created_at
        WHERE listed_at IS NULL AND status IN ('available', 'pending', 'sold')
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();

    if updated > 0 {
        info!("  Backfilled listed_at on {} vehicle(s)", updated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_get_schema_version_no_table() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fresh_database_at_current_version() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

        // Second run is a no-op
        run_migrations(&pool).await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
    }

    #[tokio::test]
    async fn test_v2_backfills_listed_at() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query(
            r#"
            INSERT INTO vehicles
                (id, stock_number, vin, year, make, model, status, created_at, updated_at)
            VALUES ('v1', 'A1', '11111111111111111', 2018, 'Honda', 'Civic', 'available',
                    '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00'),
                   ('v2', 'A2', '22222222222222222', 2018, 'Honda', 'Fit', 'draft',
                    '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate_v2(&pool).await.unwrap();

        let listed: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT id, listed_at FROM vehicles ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(listed[0].1.as_deref(), Some("2026-01-01T00:00:00+00:00"));
        assert_eq!(listed[1].1, None);
    }
}
