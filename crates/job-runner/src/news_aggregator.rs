use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use watchlist_core::{MarketNewsArticle, NewsProvider, WatchlistResult};

/// Articles retained per user per digest.
pub const MAX_ARTICLES: usize = 6;

const MAX_ROUNDS: usize = 6;
const LOOKBACK_DAYS: i64 = 5;

/// Collects recent articles for a set of symbols.
pub struct NewsAggregator {
    provider: Arc<dyn NewsProvider>,
}

impl NewsAggregator {
    pub fn new(provider: Arc<dyn NewsProvider>) -> Self {
        Self { provider }
    }

    /// Company news for `symbols`, taken round-robin so one busy ticker cannot
    /// crowd out the rest. With no symbols, general market news is used.
    /// At most [`MAX_ARTICLES`] are returned, newest first.
    pub async fn get_news(&self, symbols: &[String]) -> WatchlistResult<Vec<MarketNewsArticle>> {
        let symbols = clean_symbols(symbols);

        let mut articles = if symbols.is_empty() {
            self.market_news().await?
        } else {
            self.company_news_round_robin(&symbols).await
        };

        articles.sort_by(|a, b| b.datetime.cmp(&a.datetime));
        Ok(articles)
    }

    async fn company_news_round_robin(&self, symbols: &[String]) -> Vec<MarketNewsArticle> {
        let to = Utc::now().date_naive();
        let from = to - Duration::days(LOOKBACK_DAYS);

        let fetches = symbols.iter().map(|symbol| async move {
            match self.provider.company_news(symbol, from, to).await {
                Ok(articles) => VecDeque::from(articles),
                Err(e) => {
                    tracing::warn!("Company news for {} unavailable: {}", symbol, e);
                    VecDeque::new()
                }
            }
        });
        let mut per_symbol: Vec<VecDeque<MarketNewsArticle>> = join_all(fetches).await;

        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        for round in 0..MAX_ROUNDS {
            if collected.len() >= MAX_ARTICLES {
                break;
            }
            let queue = &mut per_symbol[round % symbols.len()];
            let Some(article) = queue.pop_front() else {
                continue;
            };
            if article.is_valid() && seen.insert(dedupe_key(&article)) {
                collected.push(article);
            }
        }
        collected
    }

    async fn market_news(&self) -> WatchlistResult<Vec<MarketNewsArticle>> {
        let mut seen = HashSet::new();
        Ok(self
            .provider
            .market_news()
            .await?
            .into_iter()
            .filter(|a| a.is_valid() && seen.insert(dedupe_key(a)))
            .take(MAX_ARTICLES)
            .collect())
    }
}

fn clean_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn dedupe_key(article: &MarketNewsArticle) -> String {
    if article.id != 0 {
        format!("id:{}", article.id)
    } else if !article.url.is_empty() {
        format!("url:{}", article.url)
    } else {
        format!("headline:{}", article.headline)
    }
}
