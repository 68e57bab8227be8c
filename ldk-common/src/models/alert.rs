//! Market and inventory alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Our vehicle moved between below/competitive/above market
    PositionChanged,
    /// Comp median moved past the configured threshold between snapshots
    MedianMoved,
    /// A competitor cut the price on a listing matching one of ours
    CompetitorPriceDrop,
    /// Vehicle has been on the lot longer than the configured limit
    StaleInventory,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PositionChanged => "position_changed",
            AlertKind::MedianMoved => "median_moved",
            AlertKind::CompetitorPriceDrop => "competitor_price_drop",
            AlertKind::StaleInventory => "stale_inventory",
        }
    }
}

impl FromStr for AlertKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "position_changed" => Ok(AlertKind::PositionChanged),
            "median_moved" => Ok(AlertKind::MedianMoved),
            "competitor_price_drop" => Ok(AlertKind::CompetitorPriceDrop),
            "stale_inventory" => Ok(AlertKind::StaleInventory),
            other => Err(Error::InvalidInput(format!("Unknown alert kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            other => Err(Error::InvalidInput(format!("Unknown alert severity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub competitor_listing_id: Option<Uuid>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Alert about to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub vehicle_id: Option<Uuid>,
    pub competitor_listing_id: Option<Uuid>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub data: serde_json::Value,
}

impl NewAlert {
    pub fn for_vehicle(
        vehicle_id: Uuid,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            vehicle_id: Some(vehicle_id),
            competitor_listing_id: None,
            kind,
            severity,
            message: message.into(),
            data,
        }
    }

    pub fn into_alert(self, now: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            vehicle_id: self.vehicle_id,
            competitor_listing_id: self.competitor_listing_id,
            kind: self.kind,
            severity: self.severity,
            message: self.message,
            data: self.data,
            created_at: now,
            acknowledged_at: None,
        }
    }
}
