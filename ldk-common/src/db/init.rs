//! Database initialization
//!
//! Startup sequence shared by both services:
//! 1. `CREATE TABLE IF NOT EXISTS` for every table
//! 2. Declarative schema sync (missing columns)
//! 3. Versioned migrations
//! 4. Default settings

use crate::db::{migrations, settings, table_schemas};
use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the shared database and bring it up to date
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Both services write to the same file
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    prepare_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema (tests)
///
/// Every connection to `sqlite::memory:` is a separate database, so the pool
/// holds exactly one connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    prepare_schema(&pool).await?;
    Ok(pool)
}

async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_vehicles_table(pool).await?;
    create_consignments_table(pool).await?;
    create_market_snapshots_table(pool).await?;
    create_market_listings_table(pool).await?;
    create_comp_cache_table(pool).await?;
    create_competitors_table(pool).await?;
    create_competitor_listings_table(pool).await?;
    create_competitor_price_history_table(pool).await?;
    create_alerts_table(pool).await?;
    create_job_runs_table(pool).await?;

    table_schemas::sync_all_table_schemas(pool).await?;
    migrations::run_migrations(pool).await?;
    settings::init_default_settings(pool).await?;

    Ok(())
}

/// Copy bootstrap values from the TOML file into empty settings
pub async fn seed_settings_from_config(
    pool: &SqlitePool,
    config: &crate::config::TomlConfig,
) -> Result<()> {
    settings::seed_if_empty(pool, settings::DEALER_ZIP, config.dealer_zip.as_deref()).await?;
    let api_key = config.autodev_api_key.as_deref();
    settings::seed_if_empty(pool, settings::AUTODEV_API_KEY, api_key).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_vehicles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            id TEXT PRIMARY KEY,
            stock_number TEXT NOT NULL UNIQUE,
            vin TEXT NOT NULL UNIQUE,
            year INTEGER NOT NULL,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            trim TEXT,
            body_style TEXT,
            exterior_color TEXT,
            interior_color TEXT,
            mileage INTEGER NOT NULL DEFAULT 0,
            price INTEGER NOT NULL DEFAULT 0,
            cost INTEGER,
            status TEXT NOT NULL DEFAULT 'draft',
            source TEXT NOT NULL DEFAULT 'purchase',
            description TEXT,
            photo_urls TEXT NOT NULL DEFAULT '[]',
            listed_at TEXT,
            sold_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (status IN ('draft', 'available', 'pending', 'sold', 'archived')),
            CHECK (mileage >= 0 AND price >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_consignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consignments (
            id TEXT PRIMARY KEY,
            owner_name TEXT NOT NULL,
            owner_email TEXT NOT NULL,
            owner_phone TEXT,
            vin TEXT NOT NULL,
            year INTEGER NOT NULL,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            trim TEXT,
            mileage INTEGER NOT NULL,
            asking_price INTEGER NOT NULL,
            condition TEXT,
            notes TEXT,
            photo_urls TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            review_note TEXT,
            vehicle_id TEXT REFERENCES vehicles(id) ON DELETE SET NULL,
            submitted_at TEXT NOT NULL,
            reviewed_at TEXT,
            CHECK (status IN ('pending', 'approved', 'rejected'))
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_market_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS market_snapshots (
            id TEXT PRIMARY KEY,
            vehicle_id TEXT NOT NULL REFERENCES vehicles(id) ON DELETE CASCADE,
            taken_at TEXT NOT NULL,
            source TEXT NOT NULL,
            cache_hit INTEGER NOT NULL DEFAULT 0,
            our_price INTEGER NOT NULL,
            comp_count INTEGER NOT NULL DEFAULT 0,
            min_price INTEGER,
            max_price INTEGER,
            median_price REAL,
            mean_price REAL,
            p25_price REAL,
            p75_price REAL,
            position TEXT NOT NULL DEFAULT 'unknown',
            delta_dollars REAL,
            delta_pct REAL,
            percentile_rank REAL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_market_listings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS market_listings (
            id TEXT PRIMARY KEY,
            snapshot_id TEXT NOT NULL REFERENCES market_snapshots(id) ON DELETE CASCADE,
            vin TEXT,
            year INTEGER NOT NULL,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            trim TEXT,
            price INTEGER NOT NULL,
            mileage INTEGER,
            dealer_name TEXT,
            city TEXT,
            state TEXT,
            url TEXT,
            listed_at TEXT,
            days_on_market INTEGER,
            source TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_comp_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comp_cache (
            cache_key TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            listings_json TEXT NOT NULL,
            listing_count INTEGER NOT NULL,
            fetched_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_competitors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competitors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            website TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_competitor_listings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competitor_listings (
            id TEXT PRIMARY KEY,
            competitor_id TEXT NOT NULL REFERENCES competitors(id) ON DELETE CASCADE,
            fingerprint TEXT NOT NULL,
            vin TEXT,
            year INTEGER NOT NULL,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            trim TEXT,
            mileage INTEGER,
            price INTEGER,
            url TEXT,
            platforms TEXT NOT NULL DEFAULT '[]',
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            removed_at TEXT,
            UNIQUE (competitor_id, fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_competitor_price_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competitor_price_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            listing_id TEXT NOT NULL REFERENCES competitor_listings(id) ON DELETE CASCADE,
            price INTEGER NOT NULL,
            observed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_alerts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            vehicle_id TEXT REFERENCES vehicles(id) ON DELETE SET NULL,
            competitor_listing_id TEXT REFERENCES competitor_listings(id) ON DELETE SET NULL,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'info',
            message TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            acknowledged_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_job_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_runs (
            id TEXT PRIMARY KEY,
            job TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            items_processed INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            CHECK (status IN ('running', 'succeeded', 'failed'))
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_tables_created() {
        let pool = init_memory_database().await.unwrap();
        for table in [
            "schema_version",
            "settings",
            "vehicles",
            "consignments",
            "market_snapshots",
            "market_listings",
            "comp_cache",
            "competitors",
            "competitor_listings",
            "competitor_price_history",
            "alerts",
            "job_runs",
        ] {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = init_memory_database().await.unwrap();
        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_seed_settings_from_config() {
        let pool = init_memory_database().await.unwrap();
        let config = crate::config::TomlConfig {
            dealer_zip: Some("78701".to_string()),
            autodev_api_key: Some("key-123".to_string()),
            ..Default::default()
        };
        seed_settings_from_config(&pool, &config).await.unwrap();
        let key: String = settings::get_setting(&pool, settings::AUTODEV_API_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, "key-123");
    }
}
