//! Background job run history

use chrono::{DateTime, Utc};
use ldk_common::db::parse_uuid;
use ldk_common::time::{from_db, from_db_opt, to_db};
use ldk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, job, started_at, finished_at, status, items_processed, error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::Internal(format!("Unknown job run status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub items_processed: i64,
    pub error: Option<String>,
}

fn row_to_run(row: &SqliteRow) -> Result<JobRun> {
    let id: String = row.get("id");
    let started_at: String = row.get("started_at");
    let status: String = row.get("status");

    Ok(JobRun {
        id: parse_uuid(&id)?,
        job: row.get("job"),
        started_at: from_db(&started_at)?,
        finished_at: from_db_opt(row.get("finished_at"))?,
        status: status.parse()?,
        items_processed: row.get("items_processed"),
        error: row.get("error"),
    })
}

/// Record a run as started; returns its id
pub async fn insert_run(pool: &SqlitePool, job: &str, started_at: DateTime<Utc>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO job_runs (id, job, started_at, status) VALUES (?, ?, ?, 'running')")
        .bind(id.to_string())
        .bind(job)
        .bind(to_db(&started_at))
        .execute(pool)
        .await?;
    Ok(id)
}

/// Close a run with its outcome
pub async fn finish_run(
    pool: &SqlitePool,
    id: Uuid,
    outcome: std::result::Result<i64, &str>,
    finished_at: DateTime<Utc>,
) -> Result<()> {
    let (status, items, error) = match outcome {
        Ok(items) => (RunStatus::Succeeded, items, None),
        Err(msg) => (RunStatus::Failed, 0, Some(msg)),
    };
    sqlx::query(
        "UPDATE job_runs SET finished_at = ?, status = ?, items_processed = ?, error = ? \
         WHERE id = ?",
    )
    .bind(to_db(&finished_at))
    .bind(status.as_str())
    .bind(items)
    .bind(error)
    .bind(id.to_string())
    .execute(pool)
        .await?;
    Ok(())
}

/// Newest first
pub async fn list_runs(pool: &SqlitePool, job: &str, limit: i64) -> Result<Vec<JobRun>> {
    let sql = format!(
        "SELECT {} FROM job_runs WHERE job = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        RUN_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(job).bind(limit).fetch_all(pool).await?;
    rows.iter().map(row_to_run).collect()
}

pub async fn last_run(pool: &SqlitePool, job: &str) -> Result<Option<JobRun>> {
    Ok(list_runs(pool, job, 1).await?.into_iter().next())
}

/// Runs left `running` by a previous process are marked failed at startup
pub async fn fail_interrupted_runs(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let updated = sqlx::query(
        "UPDATE job_runs SET status = 'failed', finished_at = ?, \
         error = 'interrupted by shutdown' WHERE status = 'running'",
    )
    .bind(to_db(&now))
    .execute(pool)
    .await?
    .rows_affected();
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ldk_common::db::init_memory_database;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let pool = init_memory_database().await.unwrap();
        let t0 = Utc::now();

        let first = insert_run(&pool, "cache_purge", t0).await.unwrap();
        finish_run(&pool, first, Ok(4), t0 + Duration::seconds(1)).await.unwrap();
        let second = insert_run(&pool, "cache_purge", t0 + Duration::hours(6)).await.unwrap();
        finish_run(&pool, second, Err("database is locked"), t0 + Duration::hours(6))
            .await
            .unwrap();
        insert_run(&pool, "competitor_sweep", t0).await.unwrap();

        let runs = list_runs(&pool, "cache_purge", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("database is locked"));
        assert_eq!(runs[1].status, RunStatus::Succeeded);
        assert_eq!(runs[1].items_processed, 4);

        assert_eq!(last_run(&pool, "cache_purge").await.unwrap().unwrap().id, second);
        assert!(last_run(&pool, "market_refresh").await.unwrap().is_none());

        assert_eq!(fail_interrupted_runs(&pool, t0).await.unwrap(), 1);
        let sweep = last_run(&pool, "competitor_sweep").await.unwrap().unwrap();
        assert_eq!(sweep.status, RunStatus::Failed);
    }
}
