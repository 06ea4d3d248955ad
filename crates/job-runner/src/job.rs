use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use watchlist_core::UserCreatedEvent;

/// Work the runner knows how to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Job {
    WelcomeEmail(UserCreatedEvent),
    DailyDigest,
    PriceRefresh,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::WelcomeEmail(_) => "welcome-email",
            Job::DailyDigest => "daily-digest",
            Job::PriceRefresh => "price-refresh",
        }
    }

    /// Run id for a cron fire. Two fires of the same job at the same instant
    /// share an id and are deduplicated by the queue.
    pub fn scheduled_run_id(&self, fire_at: DateTime<Utc>) -> String {
        format!(
            "{}:{}",
            self.name(),
            fire_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Run id for an on-demand trigger.
    pub fn manual_run_id(&self) -> String {
        format!("{}:manual:{}", self.name(), uuid::Uuid::new_v4())
    }
}

/// Run id for the welcome email of a new account; one per email address.
pub fn welcome_run_id(email: &str) -> String {
    format!("welcome:{}", email.trim().to_lowercase())
}

/// Result every workflow reports. A `false` outcome is a handled failure
/// and is not retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    pub message: String,
}

impl JobOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_serialization_is_tagged() {
        let json = serde_json::to_string(&Job::DailyDigest).unwrap();
        assert_eq!(json, r#"{"type":"daily_digest"}"#);

        let job = Job::WelcomeEmail(UserCreatedEvent {
            email: "a@b.com".into(),
            name: "Ada".into(),
            country: "US".into(),
            investment_goals: "Growth".into(),
            risk_tolerance: "Low".into(),
            preferred_industry: "Energy".into(),
        });
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(serde_json::from_str::<Job>(&json).unwrap(), job);
    }

    #[test]
    fn test_run_ids() {
        let fire_at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(
            Job::DailyDigest.scheduled_run_id(fire_at),
            "daily-digest:2026-10-19T12:00:00Z"
        );
        assert_eq!(welcome_run_id(" Ada@Example.com"), "welcome:ada@example.com");
        assert!(Job::PriceRefresh
            .manual_run_id()
            .starts_with("price-refresh:manual:"));
        assert_ne!(Job::PriceRefresh.manual_run_id(), Job::PriceRefresh.manual_run_id());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }
}
