use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::WatchlistError;

/// A symbol tracked by one user, with the last known market fields.
///
/// `(user_id, symbol)` is unique. The market fields are denormalized copies
/// refreshed by the periodic price job and may be stale or absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    pub id: i64,
    pub user_id: String,
    pub symbol: String,
    pub company: String,
    pub current_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub price_formatted: Option<String>,
    pub change_formatted: Option<String>,
    pub market_cap: Option<String>,
    pub pe_ratio: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Fields derived from a real-time quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteFields {
    pub current_price: f64,
    pub change_percent: f64,
    pub price_formatted: String,
    pub change_formatted: Option<String>,
}

/// Fields derived from the fundamental metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFields {
    pub market_cap: Option<String>,
    pub pe_ratio: Option<String>,
}

/// Partial update of the market fields of every entry for one symbol.
///
/// Each group is written only when it was fetched; a `None` group leaves the
/// stored columns untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub quote: Option<QuoteFields>,
    pub metrics: Option<MetricFields>,
}

impl PriceUpdate {
    pub fn is_empty(&self) -> bool {
        self.quote.is_none() && self.metrics.is_none()
    }
}

/// Read-only projection used by the daily digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserForNewsEmail {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// News article as returned by the market-data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketNewsArticle {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
    /// Unix seconds
    #[serde(default)]
    pub datetime: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub related: String,
    #[serde(default)]
    pub image: Option<String>,
}

impl MarketNewsArticle {
    /// An article is usable when it has a headline, summary, url and timestamp.
    pub fn is_valid(&self) -> bool {
        !self.headline.trim().is_empty()
            && !self.summary.trim().is_empty()
            && !self.url.trim().is_empty()
            && self.datetime > 0
    }
}

/// Payload of the "user created" event that starts the welcome workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedEvent {
    pub email: String,
    pub name: String,
    pub country: String,
    pub investment_goals: String,
    pub risk_tolerance: String,
    pub preferred_industry: String,
}

/// Identity resolved from a session; required by every per-user repository call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Trim and uppercase a ticker symbol.
pub fn normalize_symbol(symbol: &str) -> Result<String, WatchlistError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(WatchlistError::InvalidInput("symbol must not be empty".into()));
    }
    if symbol.len() > 20
        || !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '^'))
    {
        return Err(WatchlistError::InvalidInput(format!("invalid symbol: {}", symbol)));
    }
    Ok(symbol)
}
