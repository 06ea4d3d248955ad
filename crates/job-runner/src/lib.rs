//! Background job orchestration: a durable queue with a retrying worker pool,
//! a step log for idempotent re-execution, a cron scheduler, and the
//! welcome-email, daily-digest and price-refresh workflows.

pub mod job;
pub mod news_aggregator;
pub mod queue;
pub mod schedule;
pub mod step_log;
pub mod workflows;

pub use job::{welcome_run_id, Job, JobOutcome, RunStatus};
pub use news_aggregator::NewsAggregator;
pub use queue::{spawn_workers, JobHandler, JobQueue, QueuedRun, RunRecord, WorkerConfig};
pub use schedule::{Schedule, Scheduler};
pub use step_log::StepLog;
pub use workflows::{WorkflowContext, WorkflowSettings};
