pub mod format;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use watchlist_core::{
    MarketDataProvider, MarketNewsArticle, MetricFields, NewsProvider, PriceUpdate, QuoteFields,
    WatchlistError,
};

const BASE_URL: &str = "https://finnhub.io/api/v1";

#[derive(Clone)]
pub struct FinnhubClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl FinnhubClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, WatchlistError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| WatchlistError::ExternalApi(format!("{}: {}", path, e)))?;

        if !response.status().is_success() {
            return Err(WatchlistError::ExternalApi(format!(
                "{} HTTP {}",
                path,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| WatchlistError::ExternalApi(format!("{}: {}", path, e)))
    }

    /// Real-time quote. `Ok(None)` when the provider has no current price.
    pub async fn get_quote(&self, symbol: &str) -> Result<Option<QuoteFields>, WatchlistError> {
        let quote: QuoteResponse = self.get_json("/quote", &[("symbol", symbol)]).await?;
        Ok(quote.into_fields())
    }

    /// Fundamental metrics. `Ok(None)` when the response has no `metric` object.
    pub async fn get_metrics(&self, symbol: &str) -> Result<Option<MetricFields>, WatchlistError> {
        let metrics: MetricResponse = self
            .get_json("/stock/metric", &[("symbol", symbol), ("metric", "all")])
            .await?;
        Ok(metrics.into_fields())
    }

    pub async fn get_company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketNewsArticle>, WatchlistError> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.get_json(
            "/company-news",
            &[("symbol", symbol), ("from", from.as_str()), ("to", to.as_str())],
        )
        .await
    }

    pub async fn get_market_news(&self) -> Result<Vec<MarketNewsArticle>, WatchlistError> {
        self.get_json("/news", &[("category", "general")]).await
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubClient {
    async fn fetch_quote_and_metrics(&self, symbol: &str) -> Result<PriceUpdate, WatchlistError> {
        let (quote, metrics) = tokio::join!(self.get_quote(symbol), self.get_metrics(symbol));

        match (quote, metrics) {
            (Err(quote_err), Err(metrics_err)) => Err(WatchlistError::ExternalApi(format!(
                "{}: quote failed ({}), metrics failed ({})",
                symbol, quote_err, metrics_err
            ))),
            (quote, metrics) => {
                let quote = quote.unwrap_or_else(|e| {
                    tracing::warn!("Quote unavailable for {}: {}", symbol, e);
                    None
                });
                let metrics = metrics.unwrap_or_else(|e| {
                    tracing::warn!("Metrics unavailable for {}: {}", symbol, e);
                    None
                });
                Ok(PriceUpdate { quote, metrics })
            }
        }
    }
}

#[async_trait]
impl NewsProvider for FinnhubClient {
    async fn company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketNewsArticle>, WatchlistError> {
        self.get_company_news(symbol, from, to).await
    }

    async fn market_news(&self) -> Result<Vec<MarketNewsArticle>, WatchlistError> {
        self.get_market_news().await
    }
}

// Quote response: c = current price, d = change, dp = change percent
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    c: Option<f64>,
    #[serde(default)]
    d: Option<f64>,
    #[serde(default)]
    dp: Option<f64>,
}

impl QuoteResponse {
    fn into_fields(self) -> Option<QuoteFields> {
        let current = self.c.filter(|c| c.is_finite())?;
        Some(format::quote_fields(current, self.d, self.dp))
    }
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(default)]
    metric: Option<MetricValues>,
}

#[derive(Debug, Deserialize)]
struct MetricValues {
    #[serde(default, rename = "marketCapitalization")]
    market_capitalization: Option<f64>,
    #[serde(default, rename = "peBasicExclExtraTTM")]
    pe_basic_excl_extra_ttm: Option<f64>,
}

impl MetricResponse {
    fn into_fields(self) -> Option<MetricFields> {
        self.metric.map(|m| {
            format::metric_fields(m.market_capitalization, m.pe_basic_excl_extra_ttm)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    /// Serve `app` on an ephemeral port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_quote() {
        let quote: QuoteResponse =
            serde_json::from_str(r#"{"c": 187.44, "d": -1.5, "dp": -0.79, "h": 190.0}"#).unwrap();
        let fields = quote.into_fields().unwrap();
        assert_eq!(fields.current_price, 187.44);
        assert_eq!(fields.change_percent, -0.79);
        assert_eq!(fields.price_formatted, "$187.44");
        assert_eq!(fields.change_formatted.as_deref(), Some("-$1.50"));
    }

    #[test]
    fn test_parse_quote_without_price() {
        let quote: QuoteResponse = serde_json::from_str(r#"{"d": null, "dp": null}"#).unwrap();
        assert!(quote.into_fields().is_none());
    }

    #[test]
    fn test_parse_metrics_with_nulls() {
        let metrics: MetricResponse = serde_json::from_str(
            r#"{"metric": {"marketCapitalization": 2950000.0, "peBasicExclExtraTTM": null}, "series": {}}"#,
        )
        .unwrap();
        let fields = metrics.into_fields().unwrap();
        assert_eq!(fields.market_cap.as_deref(), Some("$2950.00B"));
        assert!(fields.pe_ratio.is_none());
    }

    #[test]
    fn test_parse_metrics_missing_object() {
        let metrics: MetricResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(metrics.into_fields().is_none());
    }

    #[test]
    fn test_parse_news() {
        let articles: Vec<MarketNewsArticle> = serde_json::from_str(
            r#"[{"category":"company","datetime":1700000000,"headline":"H","id":7,
                "image":"","related":"AAPL","source":"Reuters","summary":"S","url":"https://x"}]"#,
        )
        .unwrap();
        assert_eq!(articles.len(), 1);
        assert!(articles[0].is_valid());
    }

    #[tokio::test]
    async fn test_unreachable_provider_fails_whole_call() {
        let client = FinnhubClient::new("test".into()).with_base_url("http://127.0.0.1:9");
        let result = client.fetch_quote_and_metrics("AAPL").await;
        assert!(matches!(result, Err(WatchlistError::ExternalApi(_))));
    }

    #[tokio::test]
    async fn test_failed_quote_keeps_metrics() {
        let app = Router::new()
            .route("/quote", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/stock/metric",
                get(|| async {
                    Json(json!({
                        "metric": {"marketCapitalization": 2950000.0, "peBasicExclExtraTTM": 29.5}
                    }))
                }),
            );
        let client = FinnhubClient::new("test".into()).with_base_url(serve(app).await);

        let update = client.fetch_quote_and_metrics("AAPL").await.unwrap();
        assert!(update.quote.is_none());
        let metrics = update.metrics.unwrap();
        assert_eq!(metrics.market_cap.as_deref(), Some("$2950.00B"));
    }

    #[tokio::test]
    async fn test_failed_metrics_keeps_quote() {
        let app = Router::new()
            .route(
                "/quote",
                get(|| async { Json(json!({"c": 187.44, "d": 1.5, "dp": 0.8})) }),
            )
            .route("/stock/metric", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let client = FinnhubClient::new("test".into()).with_base_url(serve(app).await);

        let update = client.fetch_quote_and_metrics("AAPL").await.unwrap();
        assert!(update.metrics.is_none());
        let quote = update.quote.unwrap();
        assert_eq!(quote.current_price, 187.44);
        assert_eq!(quote.change_formatted.as_deref(), Some("+$1.50"));
    }

    #[tokio::test]
    #[ignore] // Only run with a valid FINNHUB_API_KEY
    async fn test_live_quote() {
        let client = FinnhubClient::new(std::env::var("FINNHUB_API_KEY").unwrap());
        let update = client.fetch_quote_and_metrics("AAPL").await.unwrap();
        assert!(update.quote.is_some());
    }
}
