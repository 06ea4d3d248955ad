use std::fmt::Write;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use notification_service::Delivery;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use watchlist_core::{MarketNewsArticle, UserForNewsEmail, WatchlistResult};

use super::WorkflowContext;
use crate::job::JobOutcome;
use crate::news_aggregator::{NewsAggregator, MAX_ARTICLES};

/// Fallback pool used when a user's own symbols yield no news.
pub const POPULAR_SYMBOLS: [&str; 8] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "NVDA", "META", "NFLX",
];

pub const NO_NEWS_TEXT: &str = "No market news available at this time.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNews {
    pub user: UserForNewsEmail,
    pub articles: Vec<MarketNewsArticle>,
}

/// What a user's digest contains. Only `Summary` is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "html", rename_all = "snake_case")]
pub enum DigestContent {
    Summary(String),
    /// No articles were found, not even from the fallback pool.
    NoNews,
    /// Articles were found but could not be summarised.
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run(ctx: &WorkflowContext, run_id: &str) -> Result<JobOutcome> {
    let users_store = &ctx.users;
    let users: Vec<UserForNewsEmail> = ctx
        .steps
        .run(run_id, "get-all-users", || async move {
            Ok::<_, anyhow::Error>(users_store.list_for_news_email().await?)
        })
        .await?;

    if users.is_empty() {
        return Ok(JobOutcome::failure("No users found for news email"));
    }

    let user_list = &users;
    let per_user: Vec<UserNews> = ctx
        .steps
        .run(run_id, "fetch-user-news", || async move {
            Ok::<_, anyhow::Error>(fetch_user_news(ctx, user_list).await)
        })
        .await?;

    let summaries = join_all(per_user.iter().map(|news| summarize(ctx, run_id, news))).await;
    let mut digests = Vec::with_capacity(summaries.len());
    for (news, content) in per_user.iter().zip(summaries) {
        digests.push((&news.user, content?));
    }

    let date = format_digest_date(Utc::now(), &ctx.settings.digest_date_format)?;
    let digest_list = &digests;
    let report: SendReport = ctx
        .steps
        .run(run_id, "send-news-emails", || async move {
            Ok::<_, anyhow::Error>(send_digests(ctx, digest_list, &date).await)
        })
        .await?;

    tracing::info!(
        "[{}] digest: {} sent, {} skipped, {} failed",
        run_id,
        report.sent,
        report.skipped,
        report.failed
    );
    Ok(JobOutcome::success(format!(
        "Daily news summary emails sent successfully ({} sent, {} skipped)",
        report.sent,
        report.skipped + report.failed
    )))
}

/// Render the subject date. An unusable format is an error rather than a panic.
pub fn format_digest_date(now: DateTime<Utc>, format: &str) -> Result<String> {
    let mut date = String::new();
    write!(date, "{}", now.format(format))
        .map_err(|_| anyhow!("invalid digest date format: {}", format))?;
    Ok(date)
}

/// News for every user, fetched concurrently. A user whose lookup fails gets
/// an empty article list.
async fn fetch_user_news(ctx: &WorkflowContext, users: &[UserForNewsEmail]) -> Vec<UserNews> {
    let aggregator = ctx.news.clone().map(NewsAggregator::new);
    let aggregator = aggregator.as_ref();

    join_all(users.iter().map(|user| async move {
        let articles = match news_for_user(ctx, aggregator, user).await {
            Ok(articles) => articles,
            Err(e) => {
                tracing::error!("Error preparing news for {}: {}", user.email, e);
                Vec::new()
            }
        };
        UserNews {
            user: user.clone(),
            articles,
        }
    }))
    .await
}

async fn news_for_user(
    ctx: &WorkflowContext,
    aggregator: Option<&NewsAggregator>,
    user: &UserForNewsEmail,
) -> Result<Vec<MarketNewsArticle>> {
    let aggregator = aggregator.ok_or_else(|| anyhow!("news provider not configured"))?;

    let symbols = ctx.watchlists.list_symbols_by_email(&user.email).await;
    let mut articles = capped(aggregator.get_news(&symbols).await)?;

    if articles.is_empty() {
        let picks = random_popular_symbols(2);
        tracing::debug!("No news for {}, falling back to {:?}", user.email, picks);
        articles = capped(aggregator.get_news(&picks).await)?;
    }

    Ok(articles)
}

fn capped(result: WatchlistResult<Vec<MarketNewsArticle>>) -> Result<Vec<MarketNewsArticle>> {
    let mut articles = result?;
    articles.truncate(MAX_ARTICLES);
    Ok(articles)
}

pub fn random_popular_symbols(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    POPULAR_SYMBOLS
        .choose_multiple(&mut rng, count)
        .map(|s| s.to_string())
        .collect()
}

/// Summarise one user's articles. The outcome of each user's step is stored,
/// so a retried run does not call the model again.
async fn summarize(ctx: &WorkflowContext, run_id: &str, news: &UserNews) -> Result<DigestContent> {
    if news.articles.is_empty() {
        return Ok(DigestContent::NoNews);
    }

    let step = format!("summarize-news-{}", news.user.email);
    ctx.steps
        .run(run_id, &step, || async move {
            let Some(ai) = &ctx.ai else {
                tracing::warn!(
                    "No text generator configured, digest for {} unavailable",
                    news.user.email
                );
                return Ok::<_, anyhow::Error>(DigestContent::Unavailable);
            };

            let news_data = serde_json::to_string_pretty(&news.articles)?;
            let prompt = ai_client::prompts::news_summary_prompt(&news_data);
            match ai.generate(&prompt).await {
                Ok(Some(text)) => Ok(DigestContent::Summary(text)),
                Ok(None) => Ok(DigestContent::Summary(NO_NEWS_TEXT.to_string())),
                Err(e) => {
                    tracing::error!("Failed to summarize news for {}: {}", news.user.email, e);
                    Ok(DigestContent::Unavailable)
                }
            }
        })
        .await
}

/// Send every `Summary` concurrently. Send failures are logged per user; an
/// email dropped for lack of a transport counts as skipped.
async fn send_digests(
    ctx: &WorkflowContext,
    digests: &[(&UserForNewsEmail, DigestContent)],
    date: &str,
) -> SendReport {
    let results = join_all(digests.iter().map(|(user, content)| async move {
        let DigestContent::Summary(html) = content else {
            tracing::debug!("Skipping digest for {}: {:?}", user.email, content);
            return None;
        };
        match ctx
            .notifier
            .send_news_summary_email(&user.email, date, html)
            .await
        {
            Ok(Delivery::Sent) => Some(true),
            Ok(Delivery::Skipped) => None,
            Err(e) => {
                tracing::warn!("Failed to send digest to {}: {}", user.email, e);
                Some(false)
            }
        }
    }))
    .await;

    results
        .into_iter()
        .fold(SendReport::default(), |mut report, result| {
            match result {
                Some(true) => report.sent += 1,
                Some(false) => report.failed += 1,
                None => report.skipped += 1,
            }
            report
        })
}
