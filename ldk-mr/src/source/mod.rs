//! Comparable listing sources
//!
//! Market snapshots pull comps through the [`ComparableSource`] trait so the
//! Auto.dev client can be swapped for an in-process fake in tests.

pub mod autodev;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use autodev::AutoDevClient;

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// No API key stored in settings
    #[error("Source not configured: {0}")]
    NotConfigured(String),

    #[error("Unauthorized (check API key)")]
    Unauthorized,

    #[error("Rate limited by source")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Comparable search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompQuery {
    pub year_min: i32,
    pub year_max: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub zip: Option<String>,
    pub radius_miles: u32,
    /// Maximum listings to return
    pub limit: usize,
}

impl CompQuery {
    /// Normalized key; queries differing only in case or padding share it
    pub fn cache_key(&self) -> String {
        fn norm(value: &str) -> String {
            value.trim().to_lowercase()
        }
        [
            self.year_min.to_string(),
            self.year_max.to_string(),
            norm(&self.make),
            norm(&self.model),
            self.trim.as_deref().map(norm).unwrap_or_default(),
            self.zip.as_deref().map(norm).unwrap_or_default(),
            self.radius_miles.to_string(),
            self.limit.to_string(),
        ]
        .join("|")
    }
}

/// One market listing returned by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompListing {
    pub vin: Option<String>,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    /// Whole dollars
    pub price: Option<i64>,
    pub mileage: Option<i64>,
    pub dealer_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub url: Option<String>,
    pub listed_at: Option<DateTime<Utc>>,
    /// Source name, e.g. "autodev"
    pub source: String,
}

#[async_trait]
pub trait ComparableSource: Send + Sync {
    async fn search(&self, query: &CompQuery) -> Result<Vec<CompListing>, SourceError>;

    /// Stable name stored with snapshots and cache rows
    fn name(&self) -> &'static str;
}
