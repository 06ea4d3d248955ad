//! Durable job queue and worker pool.
//!
//! Every run is persisted in `job_runs` before it is handed to the in-process
//! channel, so pending work survives a restart and is picked up again by
//! [`JobQueue::recover`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::job::{Job, JobOutcome, RunStatus};

/// Executes one job. Returning `Err` (or panicking) makes the worker retry the run.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, run_id: &str, job: &Job) -> Result<JobOutcome>;

    /// Called once a run has failed its last attempt.
    async fn on_failed(&self, _run_id: &str) {}
}

#[derive(Debug, Clone)]
pub struct QueuedRun {
    pub run_id: String,
    pub job: Job,
}

/// Persisted state of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub job: String,
    pub status: RunStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub outcome: Option<JobOutcome>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    sender: mpsc::Sender<QueuedRun>,
}

impl JobQueue {
    /// Create the queue and the receiving half consumed by [`spawn_workers`].
    pub async fn new(
        pool: SqlitePool,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<QueuedRun>)> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self { pool, sender };
        queue.init_tables().await?;
        Ok((queue, receiver))
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_runs (
                run_id TEXT PRIMARY KEY,
                job TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                outcome TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_runs_status ON job_runs(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist and dispatch a run. Returns `false` when the run id is already
    /// known, in which case nothing is dispatched.
    pub async fn enqueue(&self, run_id: &str, job: Job) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO job_runs (run_id, job, payload, status, attempts, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)
             ON CONFLICT(run_id) DO NOTHING",
        )
        .bind(run_id)
        .bind(job.name())
        .bind(serde_json::to_string(&job)?)
        .bind(RunStatus::Pending.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("Run {} already enqueued, skipping", run_id);
            return Ok(false);
        }

        self.dispatch(run_id, job).await?;
        tracing::info!("Enqueued {}", run_id);
        Ok(true)
    }

    /// Re-dispatch runs left pending or running by a previous process.
    pub async fn recover(&self) -> Result<usize> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT run_id, payload FROM job_runs WHERE status IN (?, ?) ORDER BY created_at",
        )
        .bind(RunStatus::Pending.as_str())
        .bind(RunStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut recovered = 0;
        for (run_id, payload) in rows {
            let job: Job = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Dropping run {} with unreadable payload: {}", run_id, e);
                    self.set_status(&run_id, RunStatus::Failed, Some(&e.to_string()))
                        .await?;
                    continue;
                }
            };
            self.set_status(&run_id, RunStatus::Pending, None).await?;
            self.dispatch(&run_id, job).await?;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!("Recovered {} unfinished job runs", recovered);
        }
        Ok(recovered)
    }

    /// Delete completed and failed runs last updated before `now - older_than`.
    pub async fn prune_finished(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = (chrono::Utc::now() - older_than).to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM job_runs WHERE status IN (?, ?) AND updated_at < ?",
        )
        .bind(RunStatus::Completed.as_str())
        .bind(RunStatus::Failed.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            tracing::info!("Pruned {} finished job runs", pruned);
        }
        Ok(pruned)
    }

    pub async fn status(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row: Option<(String, String, String, i64, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT run_id, job, status, attempts, last_error, outcome FROM job_runs WHERE run_id = ?",
            )
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(run_id, job, status, attempts, last_error, outcome)| -> Result<RunRecord> {
            Ok(RunRecord {
                status: RunStatus::parse(&status)
                    .ok_or_else(|| anyhow!("unknown run status: {}", status))?,
                attempts: attempts as u32,
                outcome: outcome.map(|o| serde_json::from_str(&o)).transpose()?,
                run_id,
                job,
                last_error,
            })
        })
        .transpose()
    }

    async fn dispatch(&self, run_id: &str, job: Job) -> Result<()> {
        self.sender
            .send(QueuedRun {
                run_id: run_id.to_string(),
                job,
            })
            .await
            .map_err(|_| anyhow!("job queue is closed"))
    }

    async fn start_attempt(&self, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE job_runs SET status = ?, attempts = attempts + 1, updated_at = ? WHERE run_id = ?",
        )
        .bind(RunStatus::Running.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, run_id: &str, outcome: &JobOutcome) -> Result<()> {
        sqlx::query("UPDATE job_runs SET status = ?, outcome = ?, updated_at = ? WHERE run_id = ?")
            .bind(RunStatus::Completed.as_str())
            .bind(serde_json::to_string(outcome)?)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(&self, run_id: &str, status: RunStatus, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE job_runs SET status = ?, last_error = COALESCE(?, last_error), updated_at = ? WHERE run_id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Spawn `config.workers` tasks sharing `receiver`. Workers exit when the
/// shutdown flag flips or the queue is dropped; a run in progress finishes
/// its current attempt first.
pub fn spawn_workers(
    queue: JobQueue,
    receiver: mpsc::Receiver<QueuedRun>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..config.workers.max(1))
        .map(|worker_id| {
            let queue = queue.clone();
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let config = config.clone();
            let mut shutdown = shutdown.clone();

            tokio::spawn(async move {
                tracing::debug!("Worker {} started", worker_id);
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    let next = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            run = rx.recv() => run,
                            _ = shutdown.changed() => None,
                        }
                    };

                    let Some(run) = next else { break };
                    execute(&queue, handler.as_ref(), &config, &mut shutdown, run).await;
                }
                tracing::debug!("Worker {} stopped", worker_id);
            })
        })
        .collect()
}

async fn execute(
    queue: &JobQueue,
    handler: &dyn JobHandler,
    config: &WorkerConfig,
    shutdown: &mut watch::Receiver<bool>,
    run: QueuedRun,
) {
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if let Err(e) = queue.start_attempt(&run.run_id).await {
            tracing::error!("[{}] failed to mark run as started: {}", run.run_id, e);
        }

        let result = AssertUnwindSafe(handler.handle(&run.run_id, &run.job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("job panicked: {}", panic_message(&*panic))));

        match result {
            Ok(outcome) => {
                if outcome.success {
                    tracing::info!("[{}] completed: {}", run.run_id, outcome.message);
                } else {
                    tracing::warn!("[{}] finished unsuccessfully: {}", run.run_id, outcome.message);
                }
                if let Err(e) = queue.complete(&run.run_id, &outcome).await {
                    tracing::error!("[{}] failed to record outcome: {}", run.run_id, e);
                }
                return;
            }
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    "[{}] attempt {}/{} failed, retrying in {:?}: {:#}",
                    run.run_id,
                    attempt,
                    max_attempts,
                    config.retry_delay,
                    e
                );
                if let Err(db_err) = queue
                    .set_status(&run.run_id, RunStatus::Pending, Some(&format!("{:#}", e)))
                    .await
                {
                    tracing::error!("[{}] failed to record error: {}", run.run_id, db_err);
                }

                // Leave the run pending for recovery if we are asked to stop mid-backoff.
                tokio::select! {
                    _ = tokio::time::sleep(config.retry_delay) => {}
                    _ = shutdown.changed() => return,
                }
            }
            Err(e) => {
                tracing::error!(
                    "[{}] failed after {} attempts: {:#}",
                    run.run_id,
                    max_attempts,
                    e
                );
                if let Err(db_err) = queue
                    .set_status(&run.run_id, RunStatus::Failed, Some(&format!("{:#}", e)))
                    .await
                {
                    tracing::error!("[{}] failed to record error: {}", run.run_id, db_err);
                }
                handler.on_failed(&run.run_id).await;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
