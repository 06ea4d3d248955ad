//! User directory: sign-up, credential checks and lookups by email.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::FromRow;
use watchlist_core::{AuthenticatedUser, UserForNewsEmail, WatchlistError, WatchlistResult};

use crate::db::{db_err, is_unique_violation, WatchlistDb};

/// Sign-up data for a new account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(alias = "fullName")]
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub investment_goals: String,
    #[serde(default)]
    pub risk_tolerance: String,
    #[serde(default)]
    pub preferred_industry: String,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    password_hash: String,
}

impl From<UserRow> for AuthenticatedUser {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
        }
    }
}

pub struct UserStore {
    db: WatchlistDb,
}

impl UserStore {
    pub fn new(db: WatchlistDb) -> Self {
        Self { db }
    }

    /// Create an account. Emails are stored lowercased and must be unique.
    pub async fn create_user(&self, user: &NewUser) -> WatchlistResult<AuthenticatedUser> {
        let email = normalize_email(&user.email)?;
        let name = user.name.trim();
        if name.is_empty() {
            return Err(WatchlistError::InvalidInput("name must not be empty".into()));
        }
        if user.password.len() < 8 {
            return Err(WatchlistError::InvalidInput(
                "password must be at least 8 characters".into(),
            ));
        }

        let password_hash = hash_password(user.password.clone()).await?;
        let id = uuid::Uuid::new_v4().to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO users
            (id, email, name, password_hash, country, investment_goals, risk_tolerance, preferred_industry, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&email)
        .bind(name)
        .bind(&password_hash)
        .bind(&user.country)
        .bind(&user.investment_goals)
        .bind(&user.risk_tolerance)
        .bind(&user.preferred_industry)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(AuthenticatedUser {
                id,
                email,
                name: name.to_string(),
            }),
            Err(e) if is_unique_violation(&e) => Err(WatchlistError::InvalidInput(format!(
                "an account already exists for {}",
                email
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Check an email/password pair. Any mismatch is `AuthenticationRequired`.
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> WatchlistResult<AuthenticatedUser> {
        let email = email.trim().to_lowercase();
        let row = self
            .fetch_row(&email)
            .await?
            .ok_or(WatchlistError::AuthenticationRequired)?;

        if verify_password(password.to_string(), row.password_hash.clone()).await? {
            Ok(row.into())
        } else {
            Err(WatchlistError::AuthenticationRequired)
        }
    }

    pub async fn find_by_email(&self, email: &str) -> WatchlistResult<Option<AuthenticatedUser>> {
        let email = email.trim().to_lowercase();
        Ok(self.fetch_row(&email).await?.map(Into::into))
    }

    /// Every user that can receive the daily digest.
    pub async fn list_for_news_email(&self) -> WatchlistResult<Vec<UserForNewsEmail>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT id, email, name FROM users WHERE email IS NOT NULL AND email != '' ORDER BY created_at",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, email, name)| UserForNewsEmail { id, email, name })
            .collect())
    }

    async fn fetch_row(&self, email: &str) -> WatchlistResult<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)
    }
}

fn normalize_email(email: &str) -> WatchlistResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(WatchlistError::InvalidInput(format!("invalid email: {}", email))),
    }
}

// Argon2 is CPU-bound; keep it off the async workers.
async fn hash_password(password: String) -> WatchlistResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| WatchlistError::Database(format!("password hashing failed: {}", e)))
    })
    .await
    .map_err(|e| WatchlistError::Database(e.to_string()))?
}

async fn verify_password(password: String, hash: String) -> WatchlistResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| WatchlistError::Database(format!("invalid password hash: {}", e)))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(WatchlistError::Database(format!(
                "password verification failed: {}",
                e
            ))),
        }
    })
    .await
    .map_err(|e| WatchlistError::Database(e.to_string()))?
}
