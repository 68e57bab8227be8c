//! Database initialization against a real file

use ldk_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use ldk_common::db::settings::{get_setting, set_setting, STALE_INVENTORY_DAYS};
use ldk_common::db::init_database;

#[tokio::test]
async fn test_database_created_when_missing() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("nested").join("lotdesk.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&pool).await.unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_reopen_preserves_settings() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("lotdesk.db");

    let pool = init_database(&db_path).await.unwrap();
    set_setting(&pool, STALE_INVENTORY_DAYS, 45).await.unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let days: i64 = get_setting(&pool, STALE_INVENTORY_DAYS).await.unwrap().unwrap();
    assert_eq!(days, 45);
}

#[tokio::test]
async fn test_two_pools_share_one_file() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("lotdesk.db");

    // Admin desk and market research open the same database
    let ad = init_database(&db_path).await.unwrap();
    let mr = init_database(&db_path).await.unwrap();

    set_setting(&ad, "dealer_zip", "10001").await.unwrap();
    let zip: String = get_setting(&mr, "dealer_zip").await.unwrap().unwrap();
    assert_eq!(zip, "10001");
}
