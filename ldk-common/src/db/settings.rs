//! Settings table access
//!
//! Runtime parameters live in the `settings` key/value table. The catalog
//! below is the single list of known keys, their defaults and what they do;
//! database initialization seeds it and the admin desk exposes it.

use sqlx::SqlitePool;
use std::fmt::Display;
use std::str::FromStr;
use tracing::info;

use crate::{Error, Result};

/// Value kind used to validate writes from the settings endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Integer,
    Float,
    Text,
}

/// Catalog entry for one setting
#[derive(Debug, Clone, Copy)]
pub struct SettingDef {
    pub key: &'static str,
    pub kind: SettingKind,
    pub units: &'static str,
    pub default_value: &'static str,
    /// Inclusive upper bound for numeric kinds
    pub max: Option<f64>,
    pub description: &'static str,
}

impl SettingDef {
    /// Check that `value` parses as this setting's kind and lies in range
    pub fn validate(&self, value: &str) -> Result<()> {
        let number = match self.kind {
            SettingKind::Integer => value.parse::<i64>().ok().map(|v| v as f64),
            SettingKind::Float => value.parse::<f64>().ok().filter(|v| v.is_finite()),
            SettingKind::Text => return Ok(()),
        };
        let Some(number) = number.filter(|v| *v >= 0.0) else {
            return Err(Error::InvalidInput(format!(
                "Setting '{}' expects a non-negative {:?}, got '{}'",
                self.key, self.kind, value
            )));
        };
        match self.max {
            Some(max) if number > max => Err(Error::InvalidInput(format!(
                "Setting '{}' must be at most {} {}, got '{}'",
                self.key, max, self.units, value
            ))),
            _ => Ok(()),
        }
    }
}

pub const API_SHARED_SECRET: &str = "api_shared_secret";
pub const API_TIMESTAMP_TOLERANCE_MS: &str = "api_timestamp_tolerance_ms";
pub const STALE_INVENTORY_DAYS: &str = "stale_inventory_days";
pub const MR_COMPETITIVE_BAND_PCT: &str = "mr_competitive_band_pct";
pub const MR_MEDIAN_MOVE_ALERT_PCT: &str = "mr_median_move_alert_pct";
pub const MR_COMPETITOR_DROP_ALERT_PCT: &str = "mr_competitor_drop_alert_pct";
pub const MR_SNAPSHOT_INTERVAL_HOURS: &str = "mr_snapshot_interval_hours";
pub const MR_COMP_CACHE_TTL_HOURS: &str = "mr_comp_cache_ttl_hours";
pub const MR_SEARCH_RADIUS_MILES: &str = "mr_search_radius_miles";
pub const MR_YEAR_WINDOW: &str = "mr_year_window";
pub const MR_MILEAGE_WINDOW: &str = "mr_mileage_window";
pub const MR_MAX_COMPS: &str = "mr_max_comps";
pub const MR_TREND_FLAT_PCT: &str = "mr_trend_flat_pct";
pub const COMPETITOR_STALE_DAYS: &str = "competitor_stale_days";
pub const DEALER_ZIP: &str = "dealer_zip";
pub const AUTODEV_API_KEY: &str = "autodev_api_key";

/// All known settings except the shared secret, which is generated
pub const SETTINGS_CATALOG: &[SettingDef] = &[
    SettingDef {
        key: API_TIMESTAMP_TOLERANCE_MS,
        kind: SettingKind::Integer,
        units: "ms",
        default_value: "5000",
        max: Some(3_600_000.0),
        description: "Maximum age of a signed API request. \
                      Requests more than 1000ms in the future are always rejected.",
    },
    SettingDef {
        key: STALE_INVENTORY_DAYS,
        kind: SettingKind::Integer,
        units: "days",
        default_value: "60",
        max: Some(3650.0),
        description:
            "Available vehicles on the lot longer than this raise a stale_inventory alert.",
    },
    SettingDef {
        key: MR_COMPETITIVE_BAND_PCT,
        kind: SettingKind::Float,
        units: "percent",
        default_value: "5.0",
        max: Some(100.0),
        description: "Half-width of the competitive band around the comp median.",
    },
    SettingDef {
        key: MR_MEDIAN_MOVE_ALERT_PCT,
        kind: SettingKind::Float,
        units: "percent",
        default_value: "3.0",
        max: Some(1000.0),
        description: "Raise median_moved when the comp median changes at least this much \
                      between snapshots.",
    },
    SettingDef {
        key: MR_COMPETITOR_DROP_ALERT_PCT,
        kind: SettingKind::Float,
        units: "percent",
        default_value: "5.0",
        max: Some(100.0),
        description: "Raise competitor_price_drop when a matching competitor listing drops \
                      at least this much.",
    },
    SettingDef {
        key: MR_SNAPSHOT_INTERVAL_HOURS,
        kind: SettingKind::Integer,
        units: "hours",
        default_value: "24",
        max: Some(8760.0),
        description: "Scheduled market refresh re-snapshots a vehicle once its latest snapshot \
                      is this old.",
    },
    SettingDef {
        key: MR_COMP_CACHE_TTL_HOURS,
        kind: SettingKind::Integer,
        units: "hours",
        default_value: "12",
        max: Some(8760.0),
        description: "Lifetime of cached comparable search results.",
    },
    SettingDef {
        key: MR_SEARCH_RADIUS_MILES,
        kind: SettingKind::Integer,
        units: "miles",
        default_value: "100",
        max: Some(5000.0),
        description: "Comparable search radius around dealer_zip.",
    },
    SettingDef {
        key: MR_YEAR_WINDOW,
        kind: SettingKind::Integer,
        units: "years",
        default_value: "1",
        max: Some(50.0),
        description: "Comparables span model year plus or minus this window.",
    },
    SettingDef {
        key: MR_MILEAGE_WINDOW,
        kind: SettingKind::Integer,
        units: "miles",
        default_value: "40000",
        max: Some(2_000_000.0),
        description:
            "Comparables further than this from our mileage are dropped. 0 disables the filter.",
    },
    SettingDef {
        key: MR_MAX_COMPS,
        kind: SettingKind::Integer,
        units: "listings",
        default_value: "100",
        max: Some(1000.0),
        description: "Maximum comparables requested per search.",
    },
    SettingDef {
        key: MR_TREND_FLAT_PCT,
        kind: SettingKind::Float,
        units: "percent",
        default_value: "1.0",
        max: Some(100.0),
        description: "Median movement below this across the price history counts as a flat trend.",
    },
    SettingDef {
        key: COMPETITOR_STALE_DAYS,
        kind: SettingKind::Integer,
        units: "days",
        default_value: "7",
        max: Some(3650.0),
        description: "Competitor listings not seen in any scan for this long are marked removed.",
    },
    SettingDef {
        key: DEALER_ZIP,
        kind: SettingKind::Text,
        units: "ZIP code",
        default_value: "",
        max: None,
        description: "Origin of comparable searches. Seeded from the TOML dealer_zip when empty.",
    },
    SettingDef {
        key: AUTODEV_API_KEY,
        kind: SettingKind::Text,
        units: "secret",
        default_value: "",
        max: None,
        description: "Auto.dev API key. Seeded from the TOML autodev_api_key when empty.",
    },
];

/// Look up a catalog entry
pub fn setting_def(key: &str) -> Option<&'static SettingDef> {
    SETTINGS_CATALOG.iter().find(|d| d.key == key)
}

/// Read and parse a setting; `None` when missing or NULL
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Read a setting, falling back to its catalog default
pub async fn get_setting_or_default<T>(db: &SqlitePool, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = get_setting::<T>(db, key).await? {
        return Ok(value);
    }
    let def = setting_def(key).ok_or_else(|| Error::Config(format!("Unknown setting '{}'", key)))?;
    def.default_value
        .parse::<T>()
        .map_err(|e| Error::Config(format!("Bad default for '{}': {}", key, e)))
}

/// Write a setting (insert or replace)
pub async fn set_setting<T: Display>(db: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// Missing settings are created; NULL values are reset to the default.
pub async fn ensure_setting(db: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(db)
        .await?
        .rows_affected();

    if inserted > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(db)
        .await?
        .rows_affected();

    if reset > 0 {
        info!("Reset NULL setting '{}' to default value: {}", key, default_value);
    }
    Ok(())
}

/// Seed every catalog setting
pub async fn init_default_settings(db: &SqlitePool) -> Result<()> {
    for def in SETTINGS_CATALOG {
        ensure_setting(db, def.key, def.default_value).await?;
    }
    info!("Default settings initialized");
    Ok(())
}

/// Copy a bootstrap value (from TOML) into settings when the stored value is empty
pub async fn seed_if_empty(db: &SqlitePool, key: &str, value: Option<&str>) -> Result<bool> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(false);
    };
    let current: Option<String> = get_setting(db, key).await?;
    if current.as_deref().map(str::is_empty).unwrap_or(true) {
        set_setting(db, key, value).await?;
        info!("Seeded setting '{}' from config file", key);
        return Ok(true);
    }
    Ok(false)
}

/// All stored settings as (key, value) pairs, sorted by key
pub async fn list_settings(db: &SqlitePool) -> Result<Vec<(String, Option<String>)>> {
    let rows = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT key, value FROM settings ORDER BY key",
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}
