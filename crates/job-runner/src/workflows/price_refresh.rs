use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use watchlist_core::{MarketDataProvider, PriceUpdate};

use super::WorkflowContext;
use crate::job::JobOutcome;

/// Prices fetched during one refresh, keyed by symbol. Symbols whose fetch
/// failed entirely are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedPrices {
    pub updates: BTreeMap<String, PriceUpdate>,
    pub batches: usize,
    pub pauses: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub updated_count: u64,
    pub total_symbols: usize,
}

/// Fetch quote and metrics for `symbols` in fixed-size batches. Symbols in a
/// batch are fetched concurrently; `pause` is inserted between consecutive
/// batches but not after the last. Failures are logged and skipped.
pub async fn fetch_in_batches(
    provider: &dyn MarketDataProvider,
    symbols: &[String],
    batch_size: usize,
    pause: Duration,
) -> FetchedPrices {
    let mut fetched = FetchedPrices::default();
    let batches: Vec<&[String]> = symbols.chunks(batch_size.max(1)).collect();

    for (i, batch) in batches.iter().enumerate() {
        let results = join_all(batch.iter().map(|symbol| async move {
            (symbol, provider.fetch_quote_and_metrics(symbol).await)
        }))
        .await;
        fetched.batches += 1;

        for (symbol, result) in results {
            match result {
                Ok(update) if !update.is_empty() => {
                    fetched.updates.insert(symbol.clone(), update);
                }
                Ok(_) => tracing::debug!("No price data returned for {}", symbol),
                Err(e) => tracing::warn!("Failed to fetch data for {}: {}", symbol, e),
            }
        }

        if i + 1 < batches.len() {
            tokio::time::sleep(pause).await;
            fetched.pauses += 1;
        }
    }

    fetched
}

/// Refresh the cached market fields of every watchlist entry. Never returns
/// an error: a top-level failure is logged and reported as a failed outcome.
pub async fn run(ctx: &WorkflowContext, run_id: &str) -> JobOutcome {
    match refresh(ctx, run_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("[{}] price refresh failed: {:#}", run_id, e);
            JobOutcome::failure("Failed to update watchlist prices")
        }
    }
}

async fn refresh(ctx: &WorkflowContext, run_id: &str) -> Result<JobOutcome> {
    let watchlists = &ctx.watchlists;
    let symbols: Vec<String> = ctx
        .steps
        .run(run_id, "get-unique-symbols", || async move {
            Ok::<_, anyhow::Error>(watchlists.distinct_symbols().await?)
        })
        .await?;

    if symbols.is_empty() {
        return Ok(JobOutcome::success("No symbols to update"));
    }

    let provider = ctx
        .market_data
        .as_deref()
        .ok_or_else(|| anyhow!("market data API key not configured"))?;
    let settings = &ctx.settings;
    let symbol_list = &symbols;
    let fetched: FetchedPrices = ctx
        .steps
        .run(run_id, "fetch-prices", || async move {
            Ok::<_, anyhow::Error>(
                fetch_in_batches(
                    provider,
                    symbol_list,
                    settings.refresh_batch_size,
                    settings.refresh_batch_pause,
                )
                .await,
            )
        })
        .await?;
    tracing::info!(
        "[{}] fetched {} of {} symbols in {} batches",
        run_id,
        fetched.updates.len(),
        symbols.len(),
        fetched.batches
    );

    let summary: RefreshSummary = ctx
        .steps
        .run(run_id, "update-watchlists", || async move {
            let mut updated_count = 0;
            for (symbol, update) in &fetched.updates {
                match watchlists.apply_price_update(symbol, update).await {
                    Ok(n) => updated_count += n,
                    Err(e) => tracing::error!("Failed to update watchlist for {}: {}", symbol, e),
                }
            }
            Ok::<_, anyhow::Error>(RefreshSummary {
                updated_count,
                total_symbols: fetched.updates.len(),
            })
        })
        .await?;

    Ok(JobOutcome::success(format!(
        "Updated prices for {} watchlist entries across {} symbols",
        summary.updated_count, summary.total_symbols
    )))
}
