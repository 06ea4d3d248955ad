use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{MarketNewsArticle, PriceUpdate, WatchlistError};

/// Source of real-time quotes and fundamental metrics.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch quote and metrics for one symbol.
    ///
    /// A half that fails is left as `None` in the returned update; an error is
    /// returned only when neither half could be fetched.
    async fn fetch_quote_and_metrics(&self, symbol: &str) -> Result<PriceUpdate, WatchlistError>;
}

/// Source of company and general market news.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketNewsArticle>, WatchlistError>;

    async fn market_news(&self) -> Result<Vec<MarketNewsArticle>, WatchlistError>;
}
