//! Cron triggers, evaluated in UTC.
//!
//! Only the two forms the application uses are accepted: a fixed daily time
//! (`M H * * *`) and a minute step (`*/N * * * *`, or `* * * * *` for every
//! minute).

use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, DurationRound, NaiveTime, Timelike, Utc};
use tokio::sync::watch;

use crate::job::Job;
use crate::queue::JobQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Daily { hour: u32, minute: u32 },
    EveryMinutes(u32),
}

impl FromStr for Schedule {
    type Err = anyhow::Error;

    fn from_str(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields.as_slice() else {
            bail!("cron expression must have 5 fields: '{}'", expr);
        };
        if [day, month, weekday].iter().any(|f| **f != "*") {
            bail!("only '*' is supported for day, month and weekday: '{}'", expr);
        }

        match (*minute, *hour) {
            ("*", "*") => Ok(Schedule::EveryMinutes(1)),
            (step, "*") if step.starts_with("*/") => {
                let n: u32 = step[2..]
                    .parse()
                    .map_err(|_| anyhow!("invalid minute step in '{}'", expr))?;
                if !(1..60).contains(&n) {
                    bail!("minute step must be between 1 and 59: '{}'", expr);
                }
                Ok(Schedule::EveryMinutes(n))
            }
            (m, h) => {
                let minute: u32 = m
                    .parse()
                    .map_err(|_| anyhow!("invalid minute in '{}'", expr))?;
                let hour: u32 = h.parse().map_err(|_| anyhow!("invalid hour in '{}'", expr))?;
                if minute > 59 || hour > 23 {
                    bail!("time out of range in '{}'", expr);
                }
                Ok(Schedule::Daily { hour, minute })
            }
        }
    }
}

impl Schedule {
    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Daily { hour, minute } => {
                let at = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
                let today = after.date_naive().and_time(at).and_utc();
                if today > after {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
            Schedule::EveryMinutes(step) => {
                let step = step.max(1);
                let mut next = after
                    .duration_trunc(Duration::minutes(1))
                    .unwrap_or(after)
                    + Duration::minutes(1);
                // cron steps restart at minute 0 of every hour
                while next.minute() % step != 0 {
                    next += Duration::minutes(1);
                }
                next
            }
        }
    }
}

struct ScheduledJob {
    schedule: Schedule,
    job: Job,
}

/// Enqueues jobs when their schedule fires.
pub struct Scheduler {
    queue: JobQueue,
    jobs: Vec<ScheduledJob>,
    retention: Option<chrono::Duration>,
}

impl Scheduler {
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            jobs: Vec::new(),
            retention: None,
        }
    }

    /// Prune finished runs older than `retention` each time the schedule fires.
    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn schedule(mut self, schedule: Schedule, job: Job) -> Self {
        tracing::info!("Scheduled {} ({:?})", job.name(), schedule);
        self.jobs.push(ScheduledJob { schedule, job });
        self
    }

    /// The next fire time and the jobs due at it.
    fn next_fire(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<&Job>)> {
        let fire_at = self
            .jobs
            .iter()
            .map(|j| j.schedule.next_after(now))
            .min()?;
        let due = self
            .jobs
            .iter()
            .filter(|j| j.schedule.next_after(now) == fire_at)
            .map(|j| &j.job)
            .collect();
        Some((fire_at, due))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = Utc::now();
            let Some((fire_at, due)) = self.next_fire(now) else {
                tracing::info!("No scheduled jobs, scheduler exiting");
                return;
            };
            let wait = (fire_at - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    for job in due {
                        let run_id = job.scheduled_run_id(fire_at);
                        if let Err(e) = self.queue.enqueue(&run_id, job.clone()).await {
                            tracing::error!("Failed to enqueue {}: {}", run_id, e);
                        }
                    }
                    if let Some(retention) = self.retention {
                        if let Err(e) = self.queue.prune_finished(retention).await {
                            tracing::warn!("Failed to prune job runs: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Scheduler stopped");
                    return;
                }
            }
        }
    }
}
