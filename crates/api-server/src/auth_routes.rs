//! Auth API Routes
//!
//! Sign-up, sign-in and sign-out. Sign-up also queues the welcome email.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use job_runner::{welcome_run_id, Job};
use serde::{Deserialize, Serialize};
use watchlist_core::{AuthenticatedUser, UserCreatedEvent, WatchlistError};
use watchlist_store::NewUser;

use crate::{auth, ApiResponse, AppError, AppState};

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: AuthenticatedUser,
}

#[derive(Serialize)]
pub struct SignOutResponse {
    pub revoked: bool,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/sign-up", post(sign_up))
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-out", post(sign_out))
}

/// Create an account, open a session and queue the welcome email
async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<Json<ApiResponse<SessionResponse>>, AppError> {
    // Checked up front so a taken email never reaches the password hasher.
    if state.users.find_by_email(&req.email).await?.is_some() {
        return Err(WatchlistError::InvalidInput(format!(
            "an account already exists for {}",
            req.email.trim().to_lowercase()
        ))
        .into());
    }
    let user = state.users.create_user(&req).await?;
    let token = state
        .sessions
        .create_session(&user.id, state.session_ttl)
        .await?;
    tracing::info!("New account: {}", user.email);

    let event = UserCreatedEvent {
        email: user.email.clone(),
        name: user.name.clone(),
        country: req.country,
        investment_goals: req.investment_goals,
        risk_tolerance: req.risk_tolerance,
        preferred_industry: req.preferred_industry,
    };
    // Sign-up succeeds even when the welcome email cannot be queued.
    let run_id = welcome_run_id(&user.email);
    match state.queue.enqueue(&run_id, Job::WelcomeEmail(event)).await {
        Ok(true) => tracing::debug!("Queued {}", run_id),
        Ok(false) => tracing::debug!("{} already queued", run_id),
        Err(e) => tracing::error!("Failed to queue welcome email for {}: {}", user.email, e),
    }

    Ok(Json(ApiResponse::success(SessionResponse { token, user })))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, AppError> {
    let user = state
        .users
        .verify_credentials(&req.email, &req.password)
        .await?;
    let token = state
        .sessions
        .create_session(&user.id, state.session_ttl)
        .await?;

    Ok(Json(ApiResponse::success(SessionResponse { token, user })))
}

async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SignOutResponse>>, AppError> {
    let token = auth::extract_token(&headers).ok_or(WatchlistError::AuthenticationRequired)?;
    let revoked = state.sessions.revoke(&token).await?;

    Ok(Json(ApiResponse::success(SignOutResponse { revoked })))
}
