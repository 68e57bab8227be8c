//! Comparable filtering, market summary and price position

use ldk_common::models::{MarketPosition, Vehicle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::stats;
use crate::source::CompListing;

/// Keep the listings that are fair comparables for `vehicle`
///
/// Drops our own VIN, listings without a positive price, and (when
/// `mileage_window > 0` and both mileages are known) listings whose mileage
/// is further than the window from ours. Listings seen more than once keep
/// their lowest price: by VIN, or by dealer/year/make/model/mileage/price
/// when there is no VIN.
pub fn filter_comparables(
    vehicle: &Vehicle,
    listings: &[CompListing],
    mileage_window: i64,
) -> Vec<CompListing> {
    let mut by_vin: HashMap<String, CompListing> = HashMap::new();
    let mut by_identity: HashMap<String, CompListing> = HashMap::new();

    for listing in listings {
        let Some(price) = listing.price.filter(|p| *p > 0) else {
            continue;
        };
        if let Some(vin) = &listing.vin {
            if vin.eq_ignore_ascii_case(&vehicle.vin) {
                continue;
            }
        }
        if mileage_window > 0 {
            if let Some(mileage) = listing.mileage {
                if (mileage - vehicle.mileage).abs() > mileage_window {
                    continue;
                }
            }
        }

        let (slot, key) = match &listing.vin {
            Some(vin) => (&mut by_vin, vin.to_ascii_uppercase()),
            None => (
                &mut by_identity,
                format!(
                    "{}|{}|{}|{}|{}|{}",
                    listing.dealer_name.as_deref().unwrap_or("").trim().to_lowercase(),
                    listing.year,
                    listing.make.trim().to_lowercase(),
                    listing.model.trim().to_lowercase(),
                    listing.mileage.map(|m| m.to_string()).unwrap_or_default(),
                    price
                ),
            ),
        };
        match slot.get(&key) {
            Some(existing) if existing.price.unwrap_or(i64::MAX) <= price => {}
            _ => {
                slot.insert(key, listing.clone());
            }
        }
    }

    let mut comps: Vec<CompListing> =
        by_vin.into_values().chain(by_identity.into_values()).collect();
    // Stable output order for storage and tests
    comps.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.vin.cmp(&b.vin)));
    comps
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub count: usize,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub median: Option<f64>,
    pub mean: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
}

pub fn summarize(prices: &[i64]) -> MarketSummary {
    let values: Vec<f64> = prices.iter().map(|p| *p as f64).collect();
    MarketSummary {
        count: prices.len(),
        min: prices.iter().copied().min(),
        max: prices.iter().copied().max(),
        median: stats::median(&values),
        mean: stats::mean(&values),
        p25: stats::percentile(&values, 25.0),
        p75: stats::percentile(&values, 75.0),
    }
}

/// Position of `our_price` against the band `median * (1 ± band_pct/100)`
pub fn classify_position(our_price: i64, median: Option<f64>, band_pct: f64) -> MarketPosition {
    let Some(median) = median else {
        return MarketPosition::Unknown;
    };
    let band = band_pct.max(0.0) / 100.0;
    let price = our_price as f64;
    if price < median * (1.0 - band) {
        MarketPosition::BelowMarket
    } else if price > median * (1.0 + band) {
        MarketPosition::AboveMarket
    } else {
        MarketPosition::Competitive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub summary: MarketSummary,
    pub position: MarketPosition,
    /// Our price minus the median
    pub delta_dollars: Option<f64>,
    /// Our price relative to the median, in percent
    pub delta_pct: Option<f64>,
    /// Where our price falls among the comps, 0..=100
    pub percentile_rank: Option<f64>,
    pub comp_count: usize,
}

/// Analyze already-filtered comps against our asking price
pub fn analyze(our_price: i64, comps: &[CompListing], band_pct: f64) -> MarketAnalysis {
    let prices: Vec<i64> = comps.iter().filter_map(|c| c.price).collect();
    let summary = summarize(&prices);
    let values: Vec<f64> = prices.iter().map(|p| *p as f64).collect();
    let ours = our_price as f64;

    MarketAnalysis {
        position: classify_position(our_price, summary.median, band_pct),
        delta_dollars: summary.median.map(|m| ours - m),
        delta_pct: summary.median.and_then(|m| stats::percent_change(m, ours)),
        percentile_rank: stats::percentile_rank(&values, ours),
        comp_count: prices.len(),
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ldk_common::models::NewVehicle;

    fn vehicle() -> Vehicle {
        NewVehicle {
            stock_number: "A1".to_string(),
            vin: "1HGCV1F34KA000001".to_string(),
            year: 2019,
            make: "Honda".to_string(),
            model: "Accord".to_string(),
            trim: None,
            body_style: None,
            exterior_color: None,
            interior_color: None,
            mileage: 40_000,
            price: 21_000,
            cost: None,
            source: None,
            description: None,
            photo_urls: vec![],
        }
        .into_vehicle(Utc::now())
        .unwrap()
    }

    fn listing(vin: Option<&str>, price: Option<i64>, mileage: Option<i64>) -> CompListing {
        CompListing {
            vin: vin.map(str::to_string),
            year: 2019,
            make: "Honda".to_string(),
            model: "Accord".to_string(),
            trim: None,
            price,
            mileage,
            dealer_name: Some("Bay Honda".to_string()),
            city: None,
            state: None,
            url: None,
            listed_at: None,
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_filter_drops_own_vin_unpriced_and_far_mileage() {
        let listings = vec![
            listing(Some("1hgcv1f34ka000001"), Some(20_000), Some(40_000)),
            listing(Some("VIN00000000000002"), None, Some(40_000)),
            listing(Some("VIN00000000000003"), Some(0), Some(40_000)),
            listing(Some("VIN00000000000004"), Some(19_000), Some(95_000)),
            listing(Some("VIN00000000000005"), Some(22_000), None),
            listing(Some("VIN00000000000006"), Some(23_000), Some(60_000)),
        ];
        let comps = filter_comparables(&vehicle(), &listings, 40_000);
        let vins: Vec<_> = comps.iter().map(|c| c.vin.clone().unwrap()).collect();
        assert_eq!(vins, vec!["VIN00000000000005", "VIN00000000000006"]);

        // Window 0 disables the mileage filter
        assert_eq!(filter_comparables(&vehicle(), &listings, 0).len(), 3);
    }

    #[test]
    fn test_filter_dedupes_keeping_lowest_price() {
        let listings = vec![
            listing(Some("VIN00000000000002"), Some(21_000), Some(41_000)),
            listing(Some("vin00000000000002"), Some(20_500), Some(41_000)),
            listing(None, Some(19_000), Some(50_000)),
            listing(None, Some(19_000), Some(50_000)),
            listing(None, Some(18_000), Some(50_000)),
        ];
        let comps = filter_comparables(&vehicle(), &listings, 0);
        assert_eq!(comps.len(), 3);
        assert_eq!(comps.iter().filter(|c| c.vin.is_some()).count(), 1);
        assert_eq!(comps.iter().find(|c| c.vin.is_some()).unwrap().price, Some(20_500));
    }

    #[test]
    fn test_summarize() {
        let s = summarize(&[20_000, 10_000, 30_000, 40_000]);
        assert_eq!(s.count, 4);
        assert_eq!(s.min, Some(10_000));
        assert_eq!(s.max, Some(40_000));
        assert_eq!(s.median, Some(25_000.0));
        assert_eq!(s.mean, Some(25_000.0));
        assert_eq!(s.p25, Some(17_500.0));
        assert_eq!(s.p75, Some(32_500.0));

        let empty = summarize(&[]);
        assert_eq!(empty.count, 0);
        assert_eq!(empty.median, None);
    }

    #[test]
    fn test_classify_position_band_edges() {
        let median = Some(20_000.0);
        assert_eq!(classify_position(18_999, median, 5.0), MarketPosition::BelowMarket);
        assert_eq!(classify_position(19_000, median, 5.0), MarketPosition::Competitive);
        assert_eq!(classify_position(21_000, median, 5.0), MarketPosition::Competitive);
        assert_eq!(classify_position(21_001, median, 5.0), MarketPosition::AboveMarket);
        assert_eq!(classify_position(21_000, None, 5.0), MarketPosition::Unknown);
    }

    #[test]
    fn test_analyze() {
        let comps = vec![
            listing(Some("VIN00000000000002"), Some(20_000), None),
            listing(Some("VIN00000000000003"), Some(22_000), None),
        ];
        let a = analyze(23_100, &comps, 5.0);
        assert_eq!(a.comp_count, 2);
        assert_eq!(a.summary.median, Some(21_000.0));
        assert_eq!(a.position, MarketPosition::AboveMarket);
        assert_eq!(a.delta_dollars, Some(2_100.0));
        assert!((a.delta_pct.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(a.percentile_rank, Some(100.0));

        let none = analyze(23_100, &[], 5.0);
        assert_eq!(none.position, MarketPosition::Unknown);
        assert_eq!(none.delta_dollars, None);
        assert_eq!(none.percentile_rank, None);
    }
}
