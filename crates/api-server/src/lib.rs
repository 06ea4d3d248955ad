//! TickerWatch API server: HTTP surface over the watchlist store, plus the
//! background job runtime (worker pool and cron scheduler) in one process.

pub mod auth;
pub mod auth_routes;
pub mod config;
pub mod jobs_routes;
pub mod request_id;
pub mod watchlist_routes;

use std::sync::Arc;

use ai_client::{GeminiClient, TextGenerator};
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use finnhub_client::FinnhubClient;
use job_runner::{spawn_workers, Job, JobQueue, Scheduler, StepLog, WorkflowContext};
use notification_service::NotificationService;
use serde::Serialize;
use serde_json::json;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use watchlist_core::{MarketDataProvider, NewsProvider, WatchlistError};
use watchlist_store::{SessionStore, UserStore, WatchlistDb, WatchlistRepository};

use config::AppConfig;

/// Runs buffered between the HTTP handlers and the workers.
const QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionStore>,
    pub watchlists: Arc<WatchlistRepository>,
    pub queue: JobQueue,
    pub session_ttl: chrono::Duration,
}

/// Success envelope: `{ "success": true, "data": ... }`
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Handler error, rendered as `{ "success": false, "error": "..." }`.
///
/// Anything convertible to `anyhow::Error` works with `?`. A
/// `WatchlistError` picks its status from the variant; everything else is 500
/// unless built with [`AppError::with_status`].
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(error: &WatchlistError) -> StatusCode {
    match error {
        WatchlistError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        WatchlistError::NotFound(_) => StatusCode::NOT_FOUND,
        WatchlistError::AlreadyExists(_) => StatusCode::CONFLICT,
        WatchlistError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        WatchlistError::ExternalApi(_) => StatusCode::BAD_GATEWAY,
        WatchlistError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = error
            .downcast_ref::<WatchlistError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, error }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        } else {
            tracing::debug!("Request rejected ({}): {}", self.status, self.error);
        }

        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// All routes with the middleware stack applied.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(auth_routes::auth_routes())
        .merge(watchlist_routes::watchlist_routes())
        .merge(jobs_routes::jobs_routes())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id::request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::session_middleware,
                )),
        )
        .with_state(state)
}

/// `RUST_LOG` filter (default `info`); `RUST_LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}

pub async fn run_server() -> anyhow::Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting TickerWatch API server v{}", env!("CARGO_PKG_VERSION"));

    // 2. Configuration
    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Database: {}", config.database_url);
    tracing::info!(
        "  Workers: {} (max {} attempts, {}s backoff)",
        config.workers.workers,
        config.workers.max_attempts,
        config.workers.retry_delay.as_secs()
    );
    tracing::info!(
        "  Price refresh: {:?}, daily digest: {:?}",
        config.price_refresh_schedule,
        config.digest_schedule
    );

    // 3. Database
    let db = WatchlistDb::new(&config.database_url).await?;
    tracing::info!("Database ready");

    // 4. External providers; each one is optional
    let finnhub = config.finnhub_api_key.clone().map(|key| {
        let client = FinnhubClient::new(key);
        Arc::new(match &config.finnhub_base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        })
    });
    if finnhub.is_some() {
        tracing::info!("Market data enabled (Finnhub)");
    } else {
        tracing::warn!("FINNHUB_API_KEY not set; price refresh and news digests are disabled");
    }

    let ai: Option<Arc<dyn TextGenerator>> = match GeminiClient::new(config.ai.clone()) {
        Ok(client) => {
            tracing::info!("AI text generation enabled ({})", client.model());
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!("AI text generation disabled: {}", e);
            None
        }
    };

    let notifier = Arc::new(NotificationService::new(&config.notification));

    // 5. Stores
    let users = Arc::new(UserStore::new(db.clone()));
    let sessions = Arc::new(SessionStore::new(db.clone()));
    let watchlists = Arc::new(match &finnhub {
        Some(client) => WatchlistRepository::new(db.clone()).with_market_data(client.clone()),
        None => WatchlistRepository::new(db.clone()),
    });

    // 6. Job runtime
    let steps = StepLog::new(db.pool().clone());
    steps.init_tables().await?;
    let (queue, receiver) = JobQueue::new(db.pool().clone(), QUEUE_CAPACITY).await?;

    let context = WorkflowContext {
        users: users.clone(),
        watchlists: watchlists.clone(),
        market_data: finnhub
            .clone()
            .map(|client| client as Arc<dyn MarketDataProvider>),
        news: finnhub.map(|client| client as Arc<dyn NewsProvider>),
        ai,
        notifier,
        steps,
        settings: config.workflow.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = spawn_workers(
        queue.clone(),
        receiver,
        Arc::new(context),
        config.workers.clone(),
        shutdown_rx.clone(),
    );
    queue.recover().await?;

    let scheduler = tokio::spawn(
        Scheduler::new(queue.clone())
            .schedule(config.price_refresh_schedule, Job::PriceRefresh)
            .schedule(config.digest_schedule, Job::DailyDigest)
            .with_retention(config.job_retention())
            .run(shutdown_rx),
    );
    tracing::info!("Job runtime started ({} workers)", workers.len());

    // 7. HTTP
    let state = AppState {
        users,
        sessions,
        watchlists,
        queue,
        session_ttl: config.session_ttl(),
    };
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    // Graceful shutdown (SIGINT + SIGTERM)
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM");
                }
            }
        })
        .await?;

    // 8. Drain the job runtime
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!("Worker task ended abnormally: {}", e);
        }
    }
    if let Err(e) = scheduler.await {
        tracing::warn!("Scheduler task ended abnormally: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
