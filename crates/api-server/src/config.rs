use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use ai_client::AiConfig;
use anyhow::{Context, Result};
use job_runner::{Schedule, WorkerConfig, WorkflowSettings};
use notification_service::NotificationConfig;

/// Ten years.
const MAX_SESSION_TTL_HOURS: i64 = 24 * 365 * 10;

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,

    // Providers; `None` disables the features that need them
    pub finnhub_api_key: Option<String>,
    pub finnhub_base_url: Option<String>,
    pub ai: AiConfig,
    pub notification: NotificationConfig,

    // Jobs
    pub digest_schedule: Schedule,
    pub price_refresh_schedule: Schedule,
    pub workers: WorkerConfig,
    pub workflow: WorkflowSettings,
    pub job_retention_days: i64,

    pub session_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut notification = NotificationConfig::from_env();
        notification.smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .context("SMTP_PORT")?;

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:tickerwatch.db".to_string()),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
                .parse()
                .context("BIND_ADDR")?,

            finnhub_api_key: non_empty("FINNHUB_API_KEY")
                .or_else(|| non_empty("NEXT_PUBLIC_FINNHUB_API_KEY")),
            finnhub_base_url: non_empty("FINNHUB_BASE_URL"),
            ai: AiConfig::default(),
            notification,

            digest_schedule: env::var("DIGEST_CRON")
                .unwrap_or_else(|_| "0 12 * * *".to_string())
                .parse()
                .context("DIGEST_CRON")?,
            price_refresh_schedule: env::var("PRICE_REFRESH_CRON")
                .unwrap_or_else(|_| "*/5 * * * *".to_string())
                .parse()
                .context("PRICE_REFRESH_CRON")?,
            workers: WorkerConfig {
                workers: env::var("JOB_WORKERS")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()
                    .context("JOB_WORKERS")?,
                max_attempts: env::var("JOB_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .context("JOB_MAX_ATTEMPTS")?,
                retry_delay: Duration::from_secs(
                    env::var("JOB_RETRY_DELAY_SECS")
                        .unwrap_or_else(|_| "5".to_string())
                        .parse()
                        .context("JOB_RETRY_DELAY_SECS")?,
                ),
            },
            workflow: WorkflowSettings {
                refresh_batch_size: env::var("REFRESH_BATCH_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("REFRESH_BATCH_SIZE")?,
                refresh_batch_pause: Duration::from_millis(
                    env::var("REFRESH_BATCH_PAUSE_MS")
                        .unwrap_or_else(|_| "100".to_string())
                        .parse()
                        .context("REFRESH_BATCH_PAUSE_MS")?,
                ),
                digest_date_format: env::var("DIGEST_DATE_FORMAT")
                    .unwrap_or_else(|_| "%A, %B %-d, %Y".to_string()),
            },
            job_retention_days: env::var("JOB_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("JOB_RETENTION_DAYS")?,

            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| "168".to_string())
                .parse()
                .context("SESSION_TTL_HOURS")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers.workers == 0 {
            anyhow::bail!("JOB_WORKERS must be at least 1");
        }
        if self.workers.max_attempts == 0 {
            anyhow::bail!("JOB_MAX_ATTEMPTS must be at least 1");
        }
        self.workflow.validate()?;
        if !(1..=3650).contains(&self.job_retention_days) {
            anyhow::bail!("JOB_RETENTION_DAYS must be between 1 and 3650");
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.session_ttl_hours) {
            anyhow::bail!(
                "SESSION_TTL_HOURS must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            );
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.job_retention_days)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}
