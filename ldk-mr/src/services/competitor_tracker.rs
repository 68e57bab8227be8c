//! Competitor inventory tracking
//!
//! Scans arrive per competitor and platform (dealer website, marketplace
//! feeds). The same car seen on several platforms collapses into one
//! listing through its fingerprint; the listing's `platforms` set records
//! where it was seen.

use chrono::{DateTime, Datelike, Utc};
use ldk_common::db::alerts::raise_alert;
use ldk_common::db::settings::{
    get_setting_or_default, COMPETITOR_STALE_DAYS, MR_COMPETITOR_DROP_ALERT_PCT, MR_YEAR_WINDOW,
};
use ldk_common::events::{EventBus, LdkEvent};
use ldk_common::models::{Alert, AlertKind, AlertSeverity, NewAlert};
use ldk_common::{time, Error};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::info;
use uuid::Uuid;

use crate::db::competitors::{
    active_listings, insert_listing, load_listing_by_fingerprint, matching_vehicles, record_price,
    update_listing, upsert_competitor, CompetitorListing,
};
use crate::error::MrResult;

/// One observation of a competitor vehicle
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScannedListing {
    pub vin: Option<String>,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub mileage: Option<i64>,
    pub price: Option<i64>,
    pub url: Option<String>,
}

/// A batch of listings scraped from one competitor on one platform
#[derive(Debug, Clone, Deserialize)]
pub struct ScanBatch {
    pub competitor: String,
    pub website: Option<String>,
    pub platform: String,
    /// Defaults to the time of ingestion
    pub scanned_at: Option<DateTime<Utc>>,
    /// The batch is the platform's complete inventory for this competitor
    #[serde(default)]
    pub full_scan: bool,
    pub listings: Vec<ScannedListing>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub competitor_id: Uuid,
    pub received: usize,
    pub new: usize,
    pub updated: usize,
    pub price_changes: usize,
    pub relisted: usize,
    pub removed: usize,
    pub alerts: Vec<Alert>,
}

/// Identity of a competitor vehicle across platforms
///
/// `vin:<VIN>` when the VIN is known, otherwise year, make, model, trim and
/// mileage rounded to the nearest 1000, lowercased.
///
/// ```
/// use ldk_mr::services::{fingerprint, ScannedListing};
///
/// let listing = ScannedListing {
///     vin: None,
///     year: 2019,
///     make: "Honda".into(),
///     model: "CR-V".into(),
///     trim: Some("EX".into()),
///     mileage: Some(41_620),
///     price: Some(23_900),
///     url: None,
/// };
/// assert_eq!(fingerprint(&listing), "2019|honda|cr-v|ex|42000");
/// ```
pub fn fingerprint(listing: &ScannedListing) -> String {
    if let Some(vin) = listing.vin.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return format!("vin:{}", vin.to_ascii_uppercase());
    }
    let mileage = listing
        .mileage
        .map(|m| (m.saturating_add(500) / 1000 * 1000).to_string())
        .unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}",
        listing.year,
        listing.make.trim(),
        listing.model.trim(),
        listing.trim.as_deref().unwrap_or("").trim(),
        mileage
    )
    .to_lowercase()
}

/// Odometer readings above this are data-entry errors
pub const MAX_LISTING_MILEAGE: i64 = 2_000_000;

fn validate_listing(listing: &ScannedListing, now: DateTime<Utc>) -> ldk_common::Result<()> {
    if listing.make.trim().is_empty() || listing.model.trim().is_empty() {
        return Err(Error::InvalidInput("Listing make and model are required".to_string()));
    }
    if listing.year < 1900 || listing.year > now.year() + 1 {
        return Err(Error::InvalidInput(format!("Listing year {} out of range", listing.year)));
    }
    if matches!(listing.price, Some(p) if p < 0) || matches!(listing.mileage, Some(m) if m < 0) {
        return Err(Error::InvalidInput("Listing price and mileage cannot be negative".to_string()));
    }
    if matches!(listing.mileage, Some(m) if m > MAX_LISTING_MILEAGE) {
        return Err(Error::InvalidInput(format!(
            "Listing mileage above {} is not plausible",
            MAX_LISTING_MILEAGE
        )));
    }
    Ok(())
}

/// Collapse repeats inside one batch, keeping the lowest price, in first-seen order
fn dedupe_batch(listings: &[ScannedListing]) -> Vec<(String, ScannedListing)> {
    let mut order: Vec<(String, ScannedListing)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for listing in listings {
        let fp = fingerprint(listing);
        match index.get(&fp) {
            Some(&i) => {
                let kept = &mut order[i].1;
                let cheaper = match (listing.price, kept.price) {
                    (Some(new), Some(old)) => new < old,
                    (Some(_), None) => true,
                    _ => false,
                };
                if cheaper {
                    *kept = listing.clone();
                }
            }
            None => {
                index.insert(fp.clone(), order.len());
                order.push((fp, listing.clone()));
            }
        }
    }
    order
}

fn clean(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

struct DropRules {
    drop_pct: f64,
    year_window: i32,
}

pub struct CompetitorTracker {
    db: SqlitePool,
    event_bus: EventBus,
}

impl CompetitorTracker {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Merge one scan batch into competitor listings
    pub async fn ingest_scan(&self, batch: ScanBatch) -> MrResult<ScanSummary> {
        let now = time::now();
        let scanned_at = batch.scanned_at.unwrap_or(now);
        let platform = batch.platform.trim().to_lowercase();
        if platform.is_empty() {
            return Err(Error::InvalidInput("Scan platform is required".to_string()).into());
        }
        for listing in &batch.listings {
            validate_listing(listing, now)?;
        }

        let rules = DropRules {
            drop_pct: get_setting_or_default(&self.db, MR_COMPETITOR_DROP_ALERT_PCT).await?,
            year_window: get_setting_or_default(&self.db, MR_YEAR_WINDOW).await?,
        };
        let listings = dedupe_batch(&batch.listings);

        let mut tx = self.db.begin().await?;
        let competitor =
            upsert_competitor(&mut *tx, &batch.competitor, batch.website.as_deref(), now).await?;

        let mut summary = ScanSummary {
            competitor_id: competitor.id,
            received: batch.listings.len(),
            ..Default::default()
        };

        let mut seen: HashSet<String> = HashSet::new();
        for (fp, scanned) in &listings {
            seen.insert(fp.clone());
            match load_listing_by_fingerprint(&mut *tx, competitor.id, fp).await? {
                None => {
                    let listing = CompetitorListing {
                        id: Uuid::new_v4(),
                        competitor_id: competitor.id,
                        fingerprint: fp.clone(),
                        vin: clean(&scanned.vin).map(|v| v.to_ascii_uppercase()),
                        year: scanned.year,
                        make: scanned.make.trim().to_string(),
                        model: scanned.model.trim().to_string(),
                        trim: clean(&scanned.trim),
                        mileage: scanned.mileage,
                        price: scanned.price,
                        url: clean(&scanned.url),
                        platforms: vec![platform.clone()],
                        first_seen_at: scanned_at,
                        last_seen_at: scanned_at,
                        removed_at: None,
                    };
                    insert_listing(&mut *tx, &listing).await?;
                    if let Some(price) = listing.price {
                        record_price(&mut *tx, listing.id, price, scanned_at).await?;
                    }
                    summary.new += 1;
                }
                Some(mut listing) => {
                    summary.updated += 1;
                    if listing.removed_at.take().is_some() {
                        summary.relisted += 1;
                    }
                    if !listing.platforms.contains(&platform) {
                        listing.platforms.push(platform.clone());
                        listing.platforms.sort();
                    }
                    listing.last_seen_at = listing.last_seen_at.max(scanned_at);
                    if let Some(vin) = clean(&scanned.vin) {
                        listing.vin = Some(vin.to_ascii_uppercase());
                    }
                    if let Some(trim) = clean(&scanned.trim) {
                        listing.trim = Some(trim);
                    }
                    if let Some(url) = clean(&scanned.url) {
                        listing.url = Some(url);
                    }
                    if scanned.mileage.is_some() {
                        listing.mileage = scanned.mileage;
                    }

                    if let Some(new_price) = scanned.price.filter(|p| listing.price != Some(*p)) {
                        record_price(&mut *tx, listing.id, new_price, scanned_at).await?;
                        summary.price_changes += 1;
                        if let Some(old_price) = listing.price {
                            let alert = check_price_drop(
                                &mut *tx,
                                &listing,
                                &competitor.name,
                                old_price,
                                new_price,
                                &rules,
                                now,
                            )
                            .await?;
                            if let Some(alert) = alert {
                                summary.alerts.push(alert);
                            }
                        }
                        listing.price = Some(new_price);
                    }

                    update_listing(&mut *tx, &listing).await?;
                }
            }
        }

        if batch.full_scan {
            for mut listing in active_listings(&mut *tx, competitor.id).await? {
                if seen.contains(&listing.fingerprint) || !listing.platforms.contains(&platform) {
                    continue;
                }
                // Still listed elsewhere: only this platform stopped showing it
                listing.platforms.retain(|p| p != &platform);
                if listing.platforms.is_empty() {
                    listing.removed_at = Some(scanned_at);
                    summary.removed += 1;
                }
                update_listing(&mut *tx, &listing).await?;
            }
        }

        tx.commit().await?;

        info!(
            competitor = %competitor.name,
            platform = %platform,
            received = summary.received,
            new = summary.new,
            price_changes = summary.price_changes,
            removed = summary.removed,
            "Competitor scan ingested"
        );

        self.event_bus.emit_lossy(LdkEvent::CompetitorScanIngested {
            competitor_id: competitor.id,
            platform,
            received: summary.received,
            new: summary.new,
            price_changes: summary.price_changes,
            removed: summary.removed,
            timestamp: now,
        });
        for alert in &summary.alerts {
            self.event_bus.emit_lossy(LdkEvent::alert_raised(alert));
        }

        Ok(summary)
    }

    /// Mark listings unseen for `competitor_stale_days` as removed
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> MrResult<u64> {
        let stale_days: i64 = get_setting_or_default(&self.db, COMPETITOR_STALE_DAYS).await?;
        Ok(crate::db::competitors::sweep_stale(&self.db, now, stale_days).await?)
    }
}

/// Raise `competitor_price_drop` when the cut is large enough and we stock a rival car
async fn check_price_drop(
    conn: &mut SqliteConnection,
    listing: &CompetitorListing,
    competitor_name: &str,
    old_price: i64,
    new_price: i64,
    rules: &DropRules,
    now: DateTime<Utc>,
) -> ldk_common::Result<Option<Alert>> {
    if old_price <= 0 || new_price >= old_price {
        return Ok(None);
    }
    let drop_pct = (old_price - new_price) as f64 / old_price as f64 * 100.0;
    if drop_pct < rules.drop_pct {
        return Ok(None);
    }

    let rivals =
        matching_vehicles(conn, &listing.make, &listing.model, listing.year, rules.year_window)
            .await?;
    let Some(first) = rivals.first() else {
        return Ok(None);
    };

    let alert = NewAlert {
        vehicle_id: Some(first.id),
        competitor_listing_id: Some(listing.id),
        kind: AlertKind::CompetitorPriceDrop,
        severity: AlertSeverity::Warning,
        message: format!(
            "{} cut a {} {} {} from ${} to ${} ({:.1}%)",
            competitor_name,
            listing.year,
            listing.make,
            listing.model,
            old_price,
            new_price,
            drop_pct
        ),
        data: json!({
            "competitor": competitor_name,
            "old_price": old_price,
            "new_price": new_price,
            "drop_pct": drop_pct,
            "matching_vehicle_ids": rivals.iter().map(|v| v.id).collect::<Vec<_>>(),
        }),
    };
    raise_alert(conn, alert, now).await
}
