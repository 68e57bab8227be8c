//! Market research services
//!
//! Each service owns a pool handle and the event bus; handlers and the
//! scheduler construct them from `AppState`.

pub mod competitor_tracker;
pub mod snapshot_service;

pub use competitor_tracker::{
    fingerprint, CompetitorTracker, ScanBatch, ScanSummary, ScannedListing,
};
pub use snapshot_service::{snapshot_due, SnapshotParams, SnapshotReport, SnapshotService};
