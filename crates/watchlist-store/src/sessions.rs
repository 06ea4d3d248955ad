//! Opaque bearer sessions. Tokens are stored only as SHA-256 digests.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use watchlist_core::{AuthenticatedUser, WatchlistError, WatchlistResult};

use crate::db::{db_err, WatchlistDb};

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SessionStore {
    db: WatchlistDb,
}

impl SessionStore {
    pub fn new(db: WatchlistDb) -> Self {
        Self { db }
    }

    /// Open a session and return the raw token. The token is never persisted.
    pub async fn create_session(&self, user_id: &str, ttl: Duration) -> WatchlistResult<String> {
        let token = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| WatchlistError::InvalidInput("session lifetime out of range".into()))?;

        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(token)
    }

    /// Resolve a token to its user. Expired sessions are deleted and yield `None`.
    pub async fn resolve(&self, token: &str) -> WatchlistResult<Option<AuthenticatedUser>> {
        let token_hash = hash_token(token);

        let row: Option<(String, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT u.id, u.email, u.name, s.expires_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = ?
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)?;

        match row {
            Some((id, email, name, expires_at)) if expires_at > Utc::now() => {
                Ok(Some(AuthenticatedUser { id, email, name }))
            }
            Some(_) => {
                tracing::debug!("Session expired, removing");
                self.delete(&token_hash).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Revoke a session. Returns whether one existed.
    pub async fn revoke(&self, token: &str) -> WatchlistResult<bool> {
        self.delete(&hash_token(token)).await
    }

    async fn delete(&self, token_hash: &str) -> WatchlistResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(self.db.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
