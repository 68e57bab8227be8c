//! HTTP API handlers for ldk-mr

pub mod competitors;
pub mod health;
pub mod jobs;
pub mod market;
pub mod sse;

pub use competitors::{ingest_scan, list_competitors, list_listings, listing_history};
pub use health::health_routes;
pub use jobs::{list_job_runs, list_jobs, run_job};
pub use market::{latest_snapshot, list_snapshots, market_overview, market_trend, run_snapshot};
pub use sse::event_stream;
