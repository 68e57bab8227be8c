//! Scrape-result cache for comparable searches
//!
//! Rows are keyed by [`CompQuery::cache_key`] and expire after the
//! configured TTL; expired rows are refetched on demand and purged by the
//! `cache_purge` job.

use chrono::{DateTime, Duration, Utc};
use ldk_common::time::{from_db, to_db};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::MrResult;
use crate::source::{CompListing, CompQuery, ComparableSource};

#[derive(Debug, Clone)]
pub struct CachedComps {
    pub listings: Vec<CompListing>,
    pub cache_hit: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Unexpired cache row for `key`, if any
pub async fn lookup(
    db: &SqlitePool,
    key: &str,
    now: DateTime<Utc>,
) -> MrResult<Option<CachedComps>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT listings_json, fetched_at FROM comp_cache WHERE cache_key = ? AND expires_at > ?",
    )
    .bind(key)
    .bind(to_db(&now))
    .fetch_optional(db)
    .await?;

    match row {
        Some((json, fetched_at)) => Ok(Some(CachedComps {
            listings: serde_json::from_str(&json).map_err(ldk_common::Error::from)?,
            cache_hit: true,
            fetched_at: from_db(&fetched_at)?,
        })),
        None => Ok(None),
    }
}

/// Insert or replace the cache row for `key`
pub async fn store(
    db: &SqlitePool,
    key: &str,
    source: &str,
    listings: &[CompListing],
    now: DateTime<Utc>,
    ttl: Duration,
) -> MrResult<()> {
    let json = serde_json::to_string(listings).map_err(ldk_common::Error::from)?;
    let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
        ldk_common::Error::Config(format!(
            "Comp cache TTL of {} hours is out of range",
            ttl.num_hours()
        ))
    })?;
    sqlx::query(
        r#"
        INSERT INTO comp_cache
            (cache_key, source, listings_json, listing_count, fetched_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cache_key) DO UPDATE SET
            source = excluded.source,
            listings_json = excluded.listings_json,
            listing_count = excluded.listing_count,
            fetched_at = excluded.fetched_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(key)
    .bind(source)
    .bind(json)
    .bind(listings.len() as i64)
    .bind(to_db(&now))
    .bind(to_db(&expires_at))
    .execute(db)
    .await?;
    Ok(())
}

/// Cached comps for `query`, fetching from `source` on a miss
///
/// Source failures propagate and leave any stale row in place.
pub async fn get_or_fetch(
    db: &SqlitePool,
    source: &dyn ComparableSource,
    query: &CompQuery,
    ttl: Duration,
    now: DateTime<Utc>,
) -> MrResult<CachedComps> {
    let key = format!("{}:{}", source.name(), query.cache_key());

    if let Some(cached) = lookup(db, &key, now).await? {
        debug!(cache_key = %key, count = cached.listings.len(), "Comp cache hit");
        return Ok(cached);
    }

    let listings = source.search(query).await?;
    store(db, &key, source.name(), &listings, now, ttl).await?;
    debug!(cache_key = %key, count = listings.len(), "Comp cache filled");

    Ok(CachedComps {
        listings,
        cache_hit: false,
        fetched_at: now,
    })
}

/// Delete expired rows; returns how many went
pub async fn purge_expired(db: &SqlitePool, now: DateTime<Utc>) -> MrResult<u64> {
    let deleted = sqlx::query("DELETE FROM comp_cache WHERE expires_at <= ?")
        .bind(to_db(&now))
        .execute(db)
        .await?
        .rows_affected();
    if deleted > 0 {
        info!("Purged {} expired comp cache entries", deleted);
    }
    Ok(deleted)
}

/// Drop one entry regardless of age; returns whether it existed
pub async fn invalidate(db: &SqlitePool, key: &str) -> MrResult<bool> {
    let deleted = sqlx::query("DELETE FROM comp_cache WHERE cache_key = ?")
        .bind(key)
        .execute(db)
        .await?
        .rows_affected();
    Ok(deleted > 0)
}
