//! Auto.dev listings API client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ldk_common::db::settings::{get_setting, AUTODEV_API_KEY};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{CompListing, CompQuery, ComparableSource, SourceError};

pub const AUTODEV_BASE_URL: &str = "https://auto.dev/api";
const USER_AGENT: &str = concat!("LotDesk/", env!("CARGO_PKG_VERSION"));
const RATE_LIMIT_MS: u64 = 500;
/// Listings per page returned by Auto.dev
pub const PAGE_SIZE: usize = 20;
const SOURCE_NAME: &str = "autodev";

/// Minimum spacing between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Auto.dev rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Where the API key comes from
enum ApiKeySource {
    Static(String),
    /// Read `autodev_api_key` on every search so admin edits apply immediately
    Settings(SqlitePool),
}

#[derive(Debug, Deserialize)]
struct ListingsPage {
    #[serde(default)]
    records: Vec<AutoDevRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoDevRecord {
    vin: Option<String>,
    year: Option<i32>,
    make: Option<String>,
    model: Option<String>,
    trim: Option<String>,
    price_unformatted: Option<f64>,
    mileage_unformatted: Option<f64>,
    dealer_name: Option<String>,
    city: Option<String>,
    state: Option<String>,
    #[serde(alias = "clickoffUrl")]
    click_off_url: Option<String>,
    created_at: Option<String>,
}

impl AutoDevRecord {
    /// Records without year/make/model are useless as comps
    fn into_listing(self) -> Option<CompListing> {
        let year = self.year?;
        let make = self.make.filter(|m| !m.trim().is_empty())?;
        let model = self.model.filter(|m| !m.trim().is_empty())?;
        Some(CompListing {
            vin: self.vin.map(|v| v.trim().to_ascii_uppercase()).filter(|v| !v.is_empty()),
            year,
            make,
            model,
            trim: self.trim.filter(|t| !t.trim().is_empty()),
            price: self.price_unformatted.map(|p| p.round() as i64),
            mileage: self.mileage_unformatted.map(|m| m.round() as i64),
            dealer_name: self.dealer_name,
            city: self.city,
            state: self.state,
            url: self.click_off_url,
            listed_at: self
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            source: SOURCE_NAME.to_string(),
        })
    }
}

pub struct AutoDevClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
    api_key: ApiKeySource,
}

impl AutoDevClient {
    /// Client reading its key from the settings table
    pub fn from_settings(db: SqlitePool) -> Result<Self, SourceError> {
        Self::build(ApiKeySource::Settings(db), AUTODEV_BASE_URL)
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, SourceError> {
        Self::build(ApiKeySource::Static(api_key.into()), AUTODEV_BASE_URL)
    }

    /// Point at another host (staging, local mock)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build(api_key: ApiKeySource, base_url: &str) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
            base_url: base_url.to_string(),
            api_key,
        })
    }

    async fn api_key(&self) -> Result<String, SourceError> {
        let key = match &self.api_key {
            ApiKeySource::Static(key) => Some(key.clone()),
            ApiKeySource::Settings(db) => get_setting::<String>(db, AUTODEV_API_KEY)
                .await
                .map_err(|e| SourceError::NotConfigured(e.to_string()))?,
        };
        key.map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SourceError::NotConfigured("autodev_api_key is empty".to_string()))
    }

    fn page_params(query: &CompQuery, page: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("year_min", query.year_min.to_string()),
            ("year_max", query.year_max.to_string()),
            ("make", query.make.clone()),
            ("model", query.model.clone()),
            ("radius", query.radius_miles.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(trim) = &query.trim {
            params.push(("trim[]", trim.clone()));
        }
        if let Some(zip) = query.zip.as_deref().filter(|z| !z.is_empty()) {
            params.push(("zip", zip.to_string()));
        }
        params
    }

    async fn fetch_page(
        &self,
        api_key: &str,
        query: &CompQuery,
        page: usize,
    ) -> Result<ListingsBatch, SourceError> {
        self.rate_limiter.wait().await;

        tracing::debug!(
            make = %query.make,
            model = %query.model,
            page,
            "Querying Auto.dev listings"
        );

        let response = self
            .http_client
            .get(format!("{}/listings", self.base_url))
            .bearer_auth(api_key)
            .query(&Self::page_params(query, page))
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SourceError::Api(status.as_u16(), error_text));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        parse_listings_page(&body)
    }
}

/// One page of results
struct ListingsBatch {
    listings: Vec<CompListing>,
    /// Records the API returned, before unusable ones were dropped
    raw_count: usize,
}

/// Parse one page of the listings response, skipping unusable records
fn parse_listings_page(body: &str) -> Result<ListingsBatch, SourceError> {
    let page: ListingsPage =
        serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;
    let raw_count = page.records.len();
    let listings = page
        .records
        .into_iter()
        .filter_map(AutoDevRecord::into_listing)
        .collect();
    Ok(ListingsBatch { listings, raw_count })
}

#[async_trait]
impl ComparableSource for AutoDevClient {
    async fn search(&self, query: &CompQuery) -> Result<Vec<CompListing>, SourceError> {
        let api_key = self.api_key().await?;
        let mut listings = Vec::new();
        let mut page = 1;

        while listings.len() < query.limit {
            let batch = self.fetch_page(&api_key, query, page).await?;
            listings.extend(batch.listings);
            if batch.raw_count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        listings.truncate(query.limit);
        tracing::info!(
            make = %query.make,
            model = %query.model,
            count = listings.len(),
            pages = page,
            "Auto.dev search complete"
        );
        Ok(listings)
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}
