//! Durable step memoisation.
//!
//! A workflow wraps each side-effecting unit of work in [`StepLog::run`]. The
//! step's JSON output is stored under `(run_id, step)`; when a run is retried
//! or recovered after a restart, completed steps return their stored output
//! instead of executing again.

use std::future::Future;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct StepLog {
    pool: SqlitePool,
}

impl StepLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_steps (
                run_id TEXT NOT NULL,
                step TEXT NOT NULL,
                output TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (run_id, step)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Execute `step` once per run. Errors are not recorded, so a failed step
    /// runs again on the next attempt.
    pub async fn run<T, F, Fut>(&self, run_id: &str, step: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(output) = self.lookup(run_id, step).await? {
            match serde_json::from_str(&output) {
                Ok(value) => {
                    tracing::debug!("[{}] step '{}' already completed, replaying", run_id, step);
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] stored output of step '{}' is unreadable, re-running: {}",
                        run_id,
                        step,
                        e
                    );
                }
            }
        }

        let value = f().await?;
        self.record(run_id, step, &serde_json::to_string(&value)?)
            .await?;
        Ok(value)
    }

    /// Names of the completed steps of a run, oldest first.
    pub async fn completed_steps(&self, run_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT step FROM job_steps WHERE run_id = ? ORDER BY completed_at, rowid",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(step,)| step).collect())
    }

    /// Forget every step of a finished run.
    pub async fn clear(&self, run_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_steps WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn lookup(&self, run_id: &str, step: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT output FROM job_steps WHERE run_id = ? AND step = ?")
                .bind(run_id)
                .bind(step)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(output,)| output))
    }

    async fn record(&self, run_id: &str, step: &str, output: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_steps (run_id, step, output, completed_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(run_id, step) DO UPDATE SET output = excluded.output, completed_at = excluded.completed_at",
        )
        .bind(run_id)
        .bind(step)
        .bind(output)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
