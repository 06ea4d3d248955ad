//! Watchlist API Routes
//!
//! Per-user watchlist management. Every route needs a signed-in user.

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use watchlist_core::{normalize_symbol, WatchlistEntry};

use crate::auth::CurrentUser;
use crate::{ApiResponse, AppError, AppState};

/// Request to add a stock
#[derive(Deserialize)]
pub struct AddToWatchlistRequest {
    pub symbol: String,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Serialize)]
pub struct RemovedResponse {
    pub symbol: String,
}

pub fn watchlist_routes() -> Router<AppState> {
    Router::new()
        .route("/api/watchlist", get(get_watchlist).post(add_to_watchlist))
        .route("/api/watchlist/:symbol", delete(remove_from_watchlist))
}

/// Newest entries first
async fn get_watchlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<Vec<WatchlistEntry>>>, AppError> {
    let entries = state.watchlists.list(&user).await?;
    Ok(Json(ApiResponse::success(entries)))
}

async fn add_to_watchlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<AddToWatchlistRequest>,
) -> Result<Json<ApiResponse<WatchlistEntry>>, AppError> {
    let company = req.company.as_deref().unwrap_or_default();
    let entry = state.watchlists.add(&user, &req.symbol, company).await?;
    Ok(Json(ApiResponse::success(entry)))
}

async fn remove_from_watchlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<RemovedResponse>>, AppError> {
    let symbol = normalize_symbol(&symbol)?;
    state.watchlists.remove(&user, &symbol).await?;
    Ok(Json(ApiResponse::success(RemovedResponse { symbol })))
}
