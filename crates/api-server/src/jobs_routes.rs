//! Job API Routes
//!
//! On-demand runs of the scheduled workflows, and run status lookups.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use job_runner::{Job, JobOutcome, RunRecord};
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::{ApiResponse, AppError, AppState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedResponse {
    pub run_id: String,
    pub job: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusResponse {
    pub run_id: String,
    pub job: String,
    pub status: &'static str,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub outcome: Option<JobOutcome>,
}

impl From<RunRecord> for RunStatusResponse {
    fn from(run: RunRecord) -> Self {
        Self {
            run_id: run.run_id,
            job: run.job,
            status: run.status.as_str(),
            attempts: run.attempts,
            last_error: run.last_error,
            outcome: run.outcome,
        }
    }
}

pub fn jobs_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs/daily-digest", post(trigger_daily_digest))
        .route("/api/jobs/price-refresh", post(trigger_price_refresh))
        .route("/api/jobs/runs/:run_id", get(get_run))
}

async fn trigger_daily_digest(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<EnqueuedResponse>>, AppError> {
    tracing::info!("{} requested a daily digest run", user.email);
    enqueue_manual(&state, Job::DailyDigest).await
}

async fn trigger_price_refresh(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<EnqueuedResponse>>, AppError> {
    tracing::info!("{} requested a price refresh run", user.email);
    enqueue_manual(&state, Job::PriceRefresh).await
}

async fn enqueue_manual(
    state: &AppState,
    job: Job,
) -> Result<Json<ApiResponse<EnqueuedResponse>>, AppError> {
    let run_id = job.manual_run_id();
    let name = job.name();
    state.queue.enqueue(&run_id, job).await?;
    Ok(Json(ApiResponse::success(EnqueuedResponse { run_id, job: name })))
}

async fn get_run(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(run_id): Path<String>,
) -> Result<Json<ApiResponse<RunStatusResponse>>, AppError> {
    let run = state
        .queue
        .status(&run_id)
        .await?
        .ok_or_else(|| {
            AppError::with_status(
                StatusCode::NOT_FOUND,
                anyhow::anyhow!("Run not found: {}", run_id),
            )
        })?;
    Ok(Json(ApiResponse::success(run.into())))
}
