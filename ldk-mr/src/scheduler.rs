//! Background job scheduler
//!
//! One tokio task per job: wait a short start-up delay, then run the job
//! every period until the cancellation token fires. A job never overlaps
//! itself; manual triggers while it runs are refused.

use chrono::{DateTime, Utc};
use ldk_common::db::alerts::raise_alert;
use ldk_common::db::settings::{get_setting_or_default, STALE_INVENTORY_DAYS};
use ldk_common::db::vehicles::list_available_vehicles;
use ldk_common::events::{EventBus, LdkEvent};
use ldk_common::models::{AlertKind, AlertSeverity, NewAlert};
use ldk_common::time;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache;
use crate::db::job_runs::{self, JobRun};
use crate::db::snapshots::latest_taken_at;
use crate::error::{MrError, MrResult};
use crate::services::{snapshot_due, CompetitorTracker, SnapshotParams, SnapshotService};
use crate::source::ComparableSource;

/// Delay between service start and the first run of each job
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MarketRefresh,
    CachePurge,
    StaleInventoryCheck,
    CompetitorSweep,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::MarketRefresh,
        JobKind::CachePurge,
        JobKind::StaleInventoryCheck,
        JobKind::CompetitorSweep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::MarketRefresh => "market_refresh",
            JobKind::CachePurge => "cache_purge",
            JobKind::StaleInventoryCheck => "stale_inventory_check",
            JobKind::CompetitorSweep => "competitor_sweep",
        }
    }

    pub fn period(&self) -> Duration {
        const HOUR: u64 = 3600;
        match self {
            JobKind::MarketRefresh => Duration::from_secs(HOUR),
            JobKind::CachePurge => Duration::from_secs(6 * HOUR),
            JobKind::StaleInventoryCheck => Duration::from_secs(24 * HOUR),
            JobKind::CompetitorSweep => Duration::from_secs(24 * HOUR),
        }
    }
}

impl FromStr for JobKind {
    type Err = ldk_common::Error;

    fn from_str(s: &str) -> ldk_common::Result<Self> {
        JobKind::ALL
            .into_iter()
            .find(|job| job.as_str() == s)
            .ok_or_else(|| ldk_common::Error::NotFound(format!("Job {}", s)))
    }
}

/// Job listing row for `GET /api/jobs`
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: JobKind,
    pub period_seconds: u64,
    pub running: bool,
    pub last_run: Option<JobRun>,
}

/// Clears the job's running flag when dropped
struct RunGuard {
    running: Arc<Mutex<HashSet<JobKind>>>,
    job: JobKind,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.job);
    }
}

pub struct Scheduler {
    db: SqlitePool,
    source: Arc<dyn ComparableSource>,
    event_bus: EventBus,
    running: Arc<Mutex<HashSet<JobKind>>>,
    startup_delay: Duration,
}

impl Scheduler {
    pub fn new(db: SqlitePool, source: Arc<dyn ComparableSource>, event_bus: EventBus) -> Self {
        Self {
            db,
            source,
            event_bus,
            running: Arc::new(Mutex::new(HashSet::new())),
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Spawn one periodic task per job
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        JobKind::ALL
            .into_iter()
            .map(|job| {
                let scheduler = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { scheduler.job_loop(job, cancel).await })
            })
            .collect()
    }

    async fn job_loop(&self, job: JobKind, cancel: CancellationToken) {
        info!(job = job.as_str(), period_secs = job.period().as_secs(), "Job scheduled");
        let mut wait = self.startup_delay;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(job = job.as_str(), "Job loop stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.run_now(job).await {
                Ok(_) => {}
                Err(MrError::AlreadyRunning(_)) => {
                    debug!(job = job.as_str(), "Skipping tick, job still running")
                }
                Err(e) => error!(job = job.as_str(), "Job could not be recorded: {}", e),
            }
            wait = job.period();
        }
    }

    pub fn is_running(&self, job: JobKind) -> bool {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).contains(&job)
    }

    fn try_acquire(&self, job: JobKind) -> MrResult<RunGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(job) {
            return Err(MrError::AlreadyRunning(job.as_str().to_string()));
        }
        Ok(RunGuard {
            running: Arc::clone(&self.running),
            job,
        })
    }

    /// Start a run in the background; returns its run id
    pub async fn trigger(self: &Arc<Self>, job: JobKind) -> MrResult<Uuid> {
        let guard = self.try_acquire(job)?;
        let run_id = self.begin_run(job).await?;
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            scheduler.complete_run(job, run_id).await;
        });
        Ok(run_id)
    }

    /// Run a job to completion on the current task
    ///
    /// `Err` only when the run could not start; a failed job is recorded
    /// and returned as the run's status.
    pub async fn run_now(&self, job: JobKind) -> MrResult<JobRun> {
        let _guard = self.try_acquire(job)?;
        let run_id = self.begin_run(job).await?;
        self.complete_run(job, run_id).await;
        job_runs::last_run(&self.db, job.as_str())
            .await?
            .ok_or_else(|| ldk_common::Error::Internal(format!("Run {} vanished", run_id)).into())
    }

    async fn begin_run(&self, job: JobKind) -> MrResult<Uuid> {
        let started = time::now();
        let run_id = job_runs::insert_run(&self.db, job.as_str(), started).await?;
        self.event_bus.emit_lossy(LdkEvent::JobStarted {
            job: job.as_str().to_string(),
            run_id,
            timestamp: started,
        });
        Ok(run_id)
    }

    async fn complete_run(&self, job: JobKind, run_id: Uuid) {
        let started = std::time::Instant::now();
        let outcome = self.execute(job).await;
        let finished = time::now();

        let recorded = match &outcome {
            Ok(items) => {
                info!(
                    job = job.as_str(),
                    items,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.event_bus.emit_lossy(LdkEvent::JobCompleted {
                    job: job.as_str().to_string(),
                    run_id,
                    items_processed: *items,
                    timestamp: finished,
                });
                job_runs::finish_run(&self.db, run_id, Ok(*items), finished).await
            }
            Err(message) => {
                warn!(job = job.as_str(), "Job failed: {}", message);
                self.event_bus.emit_lossy(LdkEvent::JobFailed {
                    job: job.as_str().to_string(),
                    run_id,
                    error: message.clone(),
                    timestamp: finished,
                });
                job_runs::finish_run(&self.db, run_id, Err(message.as_str()), finished).await
            }
        };
        if let Err(e) = recorded {
            error!(job = job.as_str(), %run_id, "Failed to record job outcome: {}", e);
        }
    }

    async fn execute(&self, job: JobKind) -> Result<i64, String> {
        let now = time::now();
        let result = match job {
            JobKind::MarketRefresh => return self.market_refresh(now).await,
            JobKind::CachePurge => cache::purge_expired(&self.db, now).await.map(|n| n as i64),
            JobKind::StaleInventoryCheck => self.stale_inventory_check(now).await,
            JobKind::CompetitorSweep => {
                CompetitorTracker::new(self.db.clone(), self.event_bus.clone())
                    .sweep_stale(now)
                    .await
                    .map(|n| n as i64)
            }
        };
        result.map_err(|e| e.to_string())
    }

    /// Snapshot every available vehicle that is due
    ///
    /// Fails only when every attempted vehicle failed.
    async fn market_refresh(&self, now: DateTime<Utc>) -> Result<i64, String> {
        let vehicles = list_available_vehicles(&self.db).await.map_err(|e| e.to_string())?;
        let params = SnapshotParams::load(&self.db).await.map_err(|e| e.to_string())?;
        let service = SnapshotService::new(
            self.db.clone(),
            Arc::clone(&self.source),
            self.event_bus.clone(),
        );

        let mut attempted = 0i64;
        let mut succeeded = 0i64;
        let mut last_error = None;
        for vehicle in &vehicles {
            let latest = latest_taken_at(&self.db, vehicle.id).await.map_err(|e| e.to_string())?;
            if !snapshot_due(vehicle, latest, params.interval, now) {
                continue;
            }
            attempted += 1;
            match service.run_for_vehicle(vehicle.id).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    warn!(
                        vehicle_id = %vehicle.id,
                        stock_number = %vehicle.stock_number,
                        "Snapshot failed: {}",
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        info!(available = vehicles.len(), attempted, succeeded, "Market refresh finished");
        match last_error {
            Some(e) if succeeded == 0 => Err(format!(
                "All {} snapshot(s) failed; last error: {}",
                attempted, e
            )),
            _ => Ok(succeeded),
        }
    }

    /// Raise `stale_inventory` for available vehicles past the threshold
    async fn stale_inventory_check(&self, now: DateTime<Utc>) -> MrResult<i64> {
        let stale_days: i64 = get_setting_or_default(&self.db, STALE_INVENTORY_DAYS).await?;
        let vehicles = list_available_vehicles(&self.db).await?;

        let mut raised = Vec::new();
        let mut conn = self.db.acquire().await?;
        for vehicle in vehicles {
            let days = vehicle.days_on_lot(now);
            if days <= stale_days {
                continue;
            }
            let alert = NewAlert::for_vehicle(
                vehicle.id,
                AlertKind::StaleInventory,
                AlertSeverity::Warning,
                format!(
                    "{} {} {} ({}) has been on the lot {} days",
                    vehicle.year, vehicle.make, vehicle.model, vehicle.stock_number, days
                ),
                json!({
                    "days_on_lot": days,
                    "threshold_days": stale_days,
                    "price": vehicle.price
                }),
            );
            if let Some(alert) = raise_alert(&mut conn, alert, now).await? {
                raised.push(alert);
            }
        }
        drop(conn);

        for alert in &raised {
            self.event_bus.emit_lossy(LdkEvent::alert_raised(alert));
        }
        Ok(raised.len() as i64)
    }

    /// Status of every job with its last run
    pub async fn job_infos(&self) -> MrResult<Vec<JobInfo>> {
        let mut infos = Vec::with_capacity(JobKind::ALL.len());
        for job in JobKind::ALL {
            infos.push(JobInfo {
                name: job,
                period_seconds: job.period().as_secs(),
                running: self.is_running(job),
                last_run: job_runs::last_run(&self.db, job.as_str()).await?,
            });
        }
        Ok(infos)
    }
}
