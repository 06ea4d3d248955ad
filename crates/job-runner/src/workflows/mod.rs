//! The background workflows and the context they run in.

pub mod daily_digest;
pub mod price_refresh;
pub mod welcome_email;

use std::sync::Arc;
use std::time::Duration;

use ai_client::TextGenerator;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use notification_service::NotificationService;
use watchlist_core::{MarketDataProvider, NewsProvider};
use watchlist_store::{UserStore, WatchlistRepository};

use crate::job::{Job, JobOutcome};
use crate::queue::JobHandler;
use crate::step_log::StepLog;

/// Tunables shared by the workflows.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub refresh_batch_size: usize,
    pub refresh_batch_pause: Duration,
    /// chrono format string for the digest date
    pub digest_date_format: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            refresh_batch_size: 10,
            refresh_batch_pause: Duration::from_millis(100),
            digest_date_format: "%A, %B %-d, %Y".to_string(),
        }
    }
}

impl WorkflowSettings {
    pub fn validate(&self) -> Result<()> {
        if self.refresh_batch_size == 0 {
            bail!("REFRESH_BATCH_SIZE must be at least 1");
        }
        if StrftimeItems::new(&self.digest_date_format).any(|item| matches!(item, Item::Error)) {
            bail!(
                "DIGEST_DATE_FORMAT is not a valid date format: {}",
                self.digest_date_format
            );
        }
        Ok(())
    }
}

/// Everything a workflow may call. Optional collaborators are absent when
/// their credentials are not configured.
#[derive(Clone)]
pub struct WorkflowContext {
    pub users: Arc<UserStore>,
    pub watchlists: Arc<WatchlistRepository>,
    pub market_data: Option<Arc<dyn MarketDataProvider>>,
    pub news: Option<Arc<dyn NewsProvider>>,
    pub ai: Option<Arc<dyn TextGenerator>>,
    pub notifier: Arc<NotificationService>,
    pub steps: StepLog,
    pub settings: WorkflowSettings,
}

#[async_trait]
impl JobHandler for WorkflowContext {
    async fn handle(&self, run_id: &str, job: &Job) -> Result<JobOutcome> {
        tracing::info!("[{}] running {}", run_id, job.name());
        let outcome = match job {
            Job::WelcomeEmail(event) => welcome_email::run(self, run_id, event).await?,
            Job::DailyDigest => daily_digest::run(self, run_id).await?,
            Job::PriceRefresh => price_refresh::run(self, run_id).await,
        };

        self.clear_steps(run_id).await;
        Ok(outcome)
    }

    async fn on_failed(&self, run_id: &str) {
        self.clear_steps(run_id).await;
    }
}

impl WorkflowContext {
    /// A finished run is never re-executed, so its memoised steps can go.
    async fn clear_steps(&self, run_id: &str) {
        if let Err(e) = self.steps.clear(run_id).await {
            tracing::warn!("[{}] failed to clear step log: {}", run_id, e);
        }
    }
}
