use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use watchlist_core::{AuthenticatedUser, WatchlistError};

use crate::{AppError, AppState};

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;

/// Session middleware.
///
/// Looks for a session token in:
/// 1. Authorization: Bearer <token> header
/// 2. X-Session-Token header
///
/// A token that resolves to a live session puts its `AuthenticatedUser` into
/// the request extensions. Requests without one pass through untouched; the
/// [`CurrentUser`] extractor rejects them on routes that need a user.
pub async fn session_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_token(&headers) {
        match state.sessions.resolve(&token).await {
            Ok(Some(user)) => {
                tracing::debug!("Session {} resolved to {}", mask_token(&token), user.email);
                request.extensions_mut().insert(user);
            }
            Ok(None) => {
                tracing::debug!("Unknown or expired session {}", mask_token(&token));
            }
            Err(e) => {
                tracing::warn!("Session lookup failed: {}", e);
            }
        }
    }

    next.run(request).await
}

/// Extract the session token from request headers.
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("Authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    headers
        .get("X-Session-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Mask a token for logging (show first 4 and last 4 characters)
pub(crate) fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        return "****".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

/// The signed-in user. Rejects with 401 when the session middleware found none.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| WatchlistError::AuthenticationRequired.into())
    }
}
