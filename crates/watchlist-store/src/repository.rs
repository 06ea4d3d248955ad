use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use watchlist_core::{
    normalize_symbol, AuthenticatedUser, MarketDataProvider, PriceUpdate, WatchlistEntry,
    WatchlistError, WatchlistResult,
};

use crate::db::{db_err, is_unique_violation, WatchlistDb};

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    user_id: String,
    symbol: String,
    company: String,
    current_price: Option<f64>,
    change_percent: Option<f64>,
    price_formatted: Option<String>,
    change_formatted: Option<String>,
    market_cap: Option<String>,
    pe_ratio: Option<String>,
    added_at: DateTime<Utc>,
}

impl From<EntryRow> for WatchlistEntry {
    fn from(row: EntryRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            symbol: row.symbol,
            company: row.company,
            current_price: row.current_price,
            change_percent: row.change_percent,
            price_formatted: row.price_formatted,
            change_formatted: row.change_formatted,
            market_cap: row.market_cap,
            pe_ratio: row.pe_ratio,
            added_at: row.added_at,
        }
    }
}

/// Per-user watchlists. Every per-user call takes the caller's identity explicitly.
pub struct WatchlistRepository {
    db: WatchlistDb,
    market_data: Option<Arc<dyn MarketDataProvider>>,
}

impl WatchlistRepository {
    pub fn new(db: WatchlistDb) -> Self {
        Self {
            db,
            market_data: None,
        }
    }

    /// Attach a provider used to prefill market fields on `add`.
    pub fn with_market_data(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.market_data = Some(provider);
        self
    }

    /// Add a symbol for the user. The price lookup is best-effort and never
    /// fails the add.
    pub async fn add(
        &self,
        user: &AuthenticatedUser,
        symbol: &str,
        company: &str,
    ) -> WatchlistResult<WatchlistEntry> {
        let symbol = normalize_symbol(symbol)?;
        let company = match company.trim() {
            "" => symbol.as_str(),
            name => name,
        };

        if self.contains(user, &symbol).await? {
            return Err(WatchlistError::AlreadyExists(symbol));
        }

        let update = self.prefetch(&symbol).await;
        let quote = update.quote.as_ref();
        let metrics = update.metrics.as_ref();

        let result = sqlx::query_as::<_, EntryRow>(
            r#"
            INSERT INTO watchlist
            (user_id, symbol, company, current_price, change_percent, price_formatted,
             change_formatted, market_cap, pe_ratio, added_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&user.id)
        .bind(&symbol)
        .bind(company)
        .bind(quote.map(|q| q.current_price))
        .bind(quote.map(|q| q.change_percent))
        .bind(quote.map(|q| q.price_formatted.as_str()))
        .bind(quote.and_then(|q| q.change_formatted.as_deref()))
        .bind(metrics.and_then(|m| m.market_cap.as_deref()))
        .bind(metrics.and_then(|m| m.pe_ratio.as_deref()))
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await;

        match result {
            Ok(row) => {
                tracing::info!("Added {} to watchlist of {}", symbol, user.email);
                Ok(row.into())
            }
            // lost a race with a concurrent add
            Err(e) if is_unique_violation(&e) => Err(WatchlistError::AlreadyExists(symbol)),
            Err(e) => Err(db_err(e)),
        }
    }

    pub async fn remove(&self, user: &AuthenticatedUser, symbol: &str) -> WatchlistResult<()> {
        let symbol = normalize_symbol(symbol)?;

        let result = sqlx::query("DELETE FROM watchlist WHERE user_id = ? AND symbol = ?")
            .bind(&user.id)
            .bind(&symbol)
            .execute(self.db.pool())
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(WatchlistError::NotFound(symbol));
        }

        tracing::info!("Removed {} from watchlist of {}", symbol, user.email);
        Ok(())
    }

    /// All entries of the user, newest first.
    pub async fn list(&self, user: &AuthenticatedUser) -> WatchlistResult<Vec<WatchlistEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT * FROM watchlist WHERE user_id = ? ORDER BY added_at DESC, id DESC",
        )
        .bind(&user.id)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Symbols tracked by the user with this email. Never fails: unknown users
    /// and storage errors both yield an empty list.
    pub async fn list_symbols_by_email(&self, email: &str) -> Vec<String> {
        let result: Result<Vec<(String,)>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT w.symbol
            FROM watchlist w
            JOIN users u ON u.id = w.user_id
            WHERE u.email = ?
            ORDER BY w.added_at, w.id
            "#,
        )
        .bind(email.trim().to_lowercase())
        .fetch_all(self.db.pool())
        .await;

        match result {
            Ok(rows) => rows.into_iter().map(|(symbol,)| symbol).collect(),
            Err(e) => {
                tracing::warn!("Failed to load watchlist symbols for {}: {}", email, e);
                Vec::new()
            }
        }
    }

    /// Distinct symbols across every watchlist.
    pub async fn distinct_symbols(&self) -> WatchlistResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT symbol FROM watchlist ORDER BY symbol")
                .fetch_all(self.db.pool())
                .await
                .map_err(db_err)?;

        Ok(rows.into_iter().map(|(symbol,)| symbol).collect())
    }

    /// Write the fetched groups of `update` to every entry for `symbol`.
    /// Returns the number of entries touched; an empty update touches none.
    pub async fn apply_price_update(
        &self,
        symbol: &str,
        update: &PriceUpdate,
    ) -> WatchlistResult<u64> {
        if update.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE watchlist SET ");
        let mut columns = builder.separated(", ");

        if let Some(quote) = &update.quote {
            columns.push("current_price = ").push_bind_unseparated(quote.current_price);
            columns.push("change_percent = ").push_bind_unseparated(quote.change_percent);
            columns
                .push("price_formatted = ")
                .push_bind_unseparated(quote.price_formatted.clone());
            columns
                .push("change_formatted = ")
                .push_bind_unseparated(quote.change_formatted.clone());
        }
        if let Some(metrics) = &update.metrics {
            columns
                .push("market_cap = ")
                .push_bind_unseparated(metrics.market_cap.clone());
            columns
                .push("pe_ratio = ")
                .push_bind_unseparated(metrics.pe_ratio.clone());
        }

        builder.push(" WHERE symbol = ").push_bind(symbol.to_string());

        let result = builder
            .build()
            .execute(self.db.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn contains(&self, user: &AuthenticatedUser, symbol: &str) -> WatchlistResult<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM watchlist WHERE user_id = ? AND symbol = ?")
                .bind(&user.id)
                .bind(symbol)
                .fetch_optional(self.db.pool())
                .await
                .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn prefetch(&self, symbol: &str) -> PriceUpdate {
        let Some(provider) = &self.market_data else {
            return PriceUpdate::default();
        };

        match provider.fetch_quote_and_metrics(symbol).await {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("Price lookup for {} failed, adding without data: {}", symbol, e);
                PriceUpdate::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{tests::new_user, UserStore};
    use async_trait::async_trait;
    use watchlist_core::{MetricFields, QuoteFields};

    struct FixedMarketData(Option<PriceUpdate>);

    #[async_trait]
    impl MarketDataProvider for FixedMarketData {
        async fn fetch_quote_and_metrics(&self, symbol: &str) -> WatchlistResult<PriceUpdate> {
            self.0
                .clone()
                .ok_or_else(|| WatchlistError::ExternalApi(format!("no data for {}", symbol)))
        }
    }

    fn aapl_update() -> PriceUpdate {
        PriceUpdate {
            quote: Some(QuoteFields {
                current_price: 189.5,
                change_percent: 1.25,
                price_formatted: "$189.50".into(),
                change_formatted: Some("+$2.34".into()),
            }),
            metrics: Some(MetricFields {
                market_cap: Some("$2950.00B".into()),
                pe_ratio: Some("29.10".into()),
            }),
        }
    }

    async fn setup() -> (WatchlistDb, AuthenticatedUser) {
        let db = WatchlistDb::new("sqlite::memory:").await.unwrap();
        let user = UserStore::new(db.clone())
            .create_user(&new_user("ada@example.com"))
            .await
            .unwrap();
        (db, user)
    }

    #[tokio::test]
    async fn test_add_twice_is_rejected() {
        let (db, user) = setup().await;
        let repo = WatchlistRepository::new(db);

        repo.add(&user, "aapl", "Apple Inc.").await.unwrap();
        assert_eq!(
            repo.add(&user, "AAPL", "Apple Inc.").await,
            Err(WatchlistError::AlreadyExists("AAPL".into()))
        );
    }

    #[tokio::test]
    async fn test_remove_missing_and_existing() {
        let (db, user) = setup().await;
        let repo = WatchlistRepository::new(db);

        assert_eq!(
            repo.remove(&user, "MSFT").await,
            Err(WatchlistError::NotFound("MSFT".into()))
        );

        repo.add(&user, "MSFT", "Microsoft").await.unwrap();
        repo.add(&user, "NVDA", "NVIDIA").await.unwrap();
        repo.remove(&user, "msft").await.unwrap();

        let symbols: Vec<_> = repo
            .list(&user)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.symbol)
            .collect();
        assert_eq!(symbols, vec!["NVDA"]);
    }

    #[tokio::test]
    async fn test_watchlists_are_per_user() {
        let (db, ada) = setup().await;
        let grace = UserStore::new(db.clone())
            .create_user(&new_user("grace@example.com"))
            .await
            .unwrap();
        let repo = WatchlistRepository::new(db);

        repo.add(&ada, "AAPL", "Apple").await.unwrap();
        repo.add(&grace, "AAPL", "Apple").await.unwrap();

        assert_eq!(repo.list(&ada).await.unwrap().len(), 1);
        assert!(matches!(
            repo.remove(&grace, "TSLA").await,
            Err(WatchlistError::NotFound(_))
        ));
        assert_eq!(repo.distinct_symbols().await.unwrap(), vec!["AAPL"]);
    }

    #[tokio::test]
    async fn test_add_prefills_market_fields() {
        let (db, user) = setup().await;
        let repo = WatchlistRepository::new(db)
            .with_market_data(Arc::new(FixedMarketData(Some(aapl_update()))));

        let entry = repo.add(&user, "AAPL", "Apple Inc.").await.unwrap();
        assert_eq!(entry.current_price, Some(189.5));
        assert_eq!(entry.price_formatted.as_deref(), Some("$189.50"));
        assert_eq!(entry.market_cap.as_deref(), Some("$2950.00B"));
    }

    #[tokio::test]
    async fn test_add_survives_failed_price_lookup() {
        let (db, user) = setup().await;
        let repo =
            WatchlistRepository::new(db).with_market_data(Arc::new(FixedMarketData(None)));

        let entry = repo.add(&user, "TSLA", "").await.unwrap();
        assert_eq!(entry.company, "TSLA");
        assert!(entry.current_price.is_none());
        assert!(entry.price_formatted.is_none());
    }

    #[tokio::test]
    async fn test_list_symbols_by_email() {
        let (db, user) = setup().await;
        let repo = WatchlistRepository::new(db);
        repo.add(&user, "AAPL", "Apple").await.unwrap();
        repo.add(&user, "GOOGL", "Alphabet").await.unwrap();

        assert_eq!(
            repo.list_symbols_by_email("ADA@example.com").await,
            vec!["AAPL", "GOOGL"]
        );
        assert!(repo.list_symbols_by_email("nobody@example.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_price_update_writes_only_present_groups() {
        let (db, user) = setup().await;
        let repo = WatchlistRepository::new(db)
            .with_market_data(Arc::new(FixedMarketData(Some(aapl_update()))));
        repo.add(&user, "AAPL", "Apple").await.unwrap();

        let metrics_only = PriceUpdate {
            quote: None,
            metrics: Some(MetricFields {
                market_cap: Some("$3000.00B".into()),
                pe_ratio: None,
            }),
        };
        assert_eq!(repo.apply_price_update("AAPL", &metrics_only).await.unwrap(), 1);

        let entry = &repo.list(&user).await.unwrap()[0];
        assert_eq!(entry.market_cap.as_deref(), Some("$3000.00B"));
        assert!(entry.pe_ratio.is_none());
        assert_eq!(entry.price_formatted.as_deref(), Some("$189.50"));
    }

    #[tokio::test]
    async fn test_empty_update_leaves_entries_unchanged() {
        let (db, user) = setup().await;
        let repo = WatchlistRepository::new(db)
            .with_market_data(Arc::new(FixedMarketData(Some(aapl_update()))));
        let before = repo.add(&user, "AAPL", "Apple").await.unwrap();

        assert_eq!(
            repo.apply_price_update("AAPL", &PriceUpdate::default()).await.unwrap(),
            0
        );
        assert_eq!(repo.list(&user).await.unwrap()[0], before);
    }
}
