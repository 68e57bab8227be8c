//! Event types and the in-process event bus
//!
//! Services publish `LdkEvent`s on a broadcast channel; `GET /events`
//! forwards them to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AlertKind, AlertSeverity, ConsignmentStatus, MarketPosition, VehicleStatus};

/// LotDesk event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LdkEvent {
    VehicleCreated {
        vehicle_id: Uuid,
        stock_number: String,
        timestamp: DateTime<Utc>,
    },

    VehicleUpdated {
        vehicle_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    VehicleStatusChanged {
        vehicle_id: Uuid,
        old_status: VehicleStatus,
        new_status: VehicleStatus,
        timestamp: DateTime<Utc>,
    },

    VehicleDeleted {
        vehicle_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Public intake form received a submission
    ConsignmentSubmitted {
        consignment_id: Uuid,
        vin: String,
        timestamp: DateTime<Utc>,
    },

    /// Submission approved or rejected
    ConsignmentReviewed {
        consignment_id: Uuid,
        status: ConsignmentStatus,
        vehicle_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    SnapshotCompleted {
        vehicle_id: Uuid,
        snapshot_id: Uuid,
        comp_count: i64,
        median_price: Option<f64>,
        position: MarketPosition,
        timestamp: DateTime<Utc>,
    },

    AlertRaised {
        alert_id: Uuid,
        kind: AlertKind,
        severity: AlertSeverity,
        vehicle_id: Option<Uuid>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    CompetitorScanIngested {
        competitor_id: Uuid,
        platform: String,
        received: usize,
        new: usize,
        price_changes: usize,
        removed: usize,
        timestamp: DateTime<Utc>,
    },

    JobStarted {
        job: String,
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    JobCompleted {
        job: String,
        run_id: Uuid,
        items_processed: i64,
        timestamp: DateTime<Utc>,
    },

    JobFailed {
        job: String,
        run_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl LdkEvent {
    /// Event type as string (SSE event name)
    pub fn event_type(&self) -> &'static str {
        match self {
            LdkEvent::VehicleCreated { .. } => "VehicleCreated",
            LdkEvent::VehicleUpdated { .. } => "VehicleUpdated",
            LdkEvent::VehicleStatusChanged { .. } => "VehicleStatusChanged",
            LdkEvent::VehicleDeleted { .. } => "VehicleDeleted",
            LdkEvent::ConsignmentSubmitted { .. } => "ConsignmentSubmitted",
            LdkEvent::ConsignmentReviewed { .. } => "ConsignmentReviewed",
            LdkEvent::SnapshotCompleted { .. } => "SnapshotCompleted",
            LdkEvent::AlertRaised { .. } => "AlertRaised",
            LdkEvent::CompetitorScanIngested { .. } => "CompetitorScanIngested",
            LdkEvent::JobStarted { .. } => "JobStarted",
            LdkEvent::JobCompleted { .. } => "JobCompleted",
            LdkEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Build an `AlertRaised` from a stored alert
    pub fn alert_raised(alert: &crate::models::Alert) -> Self {
        LdkEvent::AlertRaised {
            alert_id: alert.id,
            kind: alert.kind,
            severity: alert.severity,
            vehicle_id: alert.vehicle_id,
            message: alert.message.clone(),
            timestamp: alert.created_at,
        }
    }
}

/// Broadcast event bus shared by all handlers and background tasks
///
/// ```
/// use ldk_common::events::{EventBus, LdkEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(LdkEvent::VehicleDeleted {
///     vehicle_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LdkEvent>,
    capacity: usize,
}

impl EventBus {
    /// `capacity` events are buffered before slow receivers start lagging
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LdkEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: LdkEvent) -> Result<usize, broadcast::error::SendError<LdkEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: LdkEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
