use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WatchlistError {
    #[error("User not authenticated")]
    AuthenticationRequired,

    #[error("Stock already in watchlist: {0}")]
    AlreadyExists(String),

    #[error("Stock not found in watchlist: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External API unavailable: {0}")]
    ExternalApi(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type WatchlistResult<T> = Result<T, WatchlistError>;
