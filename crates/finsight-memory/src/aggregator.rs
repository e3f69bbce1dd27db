//! Context aggregation across the four memory tiers.
//!
//! One call classifies the query, reads the session tier first, then fans
//! out to the remaining tiers against a single shared deadline. Tier
//! failures and timeouts only leave their part of the context empty.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use finsight_cache::{RunCache, SessionCache};
use finsight_models::budget::TokenBudget;
use finsight_models::config::MemoryConfig;
use finsight_models::context::{Context, ConversationMessage};
use finsight_models::intent::QueryIntent;
use finsight_models::profile::{TickerDecisionSummary, UserPreferences, UserProfileSummary};
use finsight_models::semantic::SemanticHit;
use finsight_models::tier::{TierId, TierReport, TierStatus};
use finsight_store::SearchFilter;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::error::MemoryError;
use crate::tiers::{ProfileTier, SemanticTier, TierFetch};

/// Bar interval looked up in the run cache.
pub const OHLCV_INTERVAL: &str = "1d";
/// Headline count looked up in the run cache.
pub const NEWS_LIMIT: u32 = 10;

/// Arguments of one aggregation call.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub query: String,
    pub session_id: String,
    pub user_id: String,
    pub run_id: Option<String>,
    /// Replaces the intent budget's overall cap. Zero is ignored.
    pub budget_override: Option<u32>,
}

impl ContextRequest {
    pub fn new(
        query: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            run_id: None,
            budget_override: None,
        }
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn budget_override(mut self, total: u32) -> Self {
        self.budget_override = Some(total);
        self
    }
}

struct SessionData {
    history: Vec<ConversationMessage>,
    summary: Option<String>,
}

#[derive(Default)]
struct ProfileData {
    profile: Option<UserProfileSummary>,
    preferences: Option<UserPreferences>,
    ticker_history: Vec<TickerDecisionSummary>,
}

/// Data returned by one fan-out task.
enum Partial {
    RunCache(BTreeMap<String, Value>),
    Durable(ProfileData),
    Semantic(Vec<SemanticHit>),
}

type FanOutTask = JoinHandle<(TierFetch<Partial>, Duration)>;

/// Assembles a [`Context`] for a query from whichever tiers it needs.
///
/// Safe to share between concurrent calls; it holds no per-call state.
pub struct ContextAggregator {
    classifier: Arc<Classifier>,
    session: Arc<SessionCache>,
    run_cache: Arc<RunCache>,
    profiles: Arc<dyn ProfileTier>,
    semantic: Arc<dyn SemanticTier>,
    config: MemoryConfig,
}

impl ContextAggregator {
    pub fn new(
        classifier: Arc<Classifier>,
        session: Arc<SessionCache>,
        run_cache: Arc<RunCache>,
        profiles: Arc<dyn ProfileTier>,
        semantic: Arc<dyn SemanticTier>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            classifier,
            session,
            run_cache,
            profiles,
            semantic,
            config,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Build the context for one query.
    ///
    /// Only empty session or user ids are errors. Tier failures, timeouts
    /// and skipped tiers show up in `tier_reports` and leave their fields
    /// empty; a context with no tier hit is still a valid result.
    pub async fn get_context(&self, request: &ContextRequest) -> Result<Context, MemoryError> {
        if request.session_id.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "session_id must not be empty".to_string(),
            ));
        }
        if request.user_id.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "user_id must not be empty".to_string(),
            ));
        }

        let start = Instant::now();
        let classification = self.classifier.classify(&request.query).await;

        let mut budget = TokenBudget::for_intent(classification.intent);
        if let Some(total) = request.budget_override.filter(|total| *total > 0) {
            budget = budget.with_total(total);
        }

        let tiers = classification.tiers_needed.clone();
        let tickers: Vec<String> = classification.tickers.iter().cloned().collect();
        let conversational = classification.intent == QueryIntent::Conversation;
        let mut context = Context::empty(classification, budget);

        // Session reads finish before anything else starts.
        if tiers.contains(&TierId::SessionCache) || conversational {
            let started = Instant::now();
            let fetch =
                fetch_session(&self.session, &request.session_id, self.config.history_turns).await;
            let status = fetch.status();
            match fetch {
                TierFetch::Hit(data) => {
                    context.conversation_history = data.history;
                    context.context_summary = data.summary;
                }
                TierFetch::Absent => {}
                TierFetch::Failed(reason) => {
                    warn!(tier = %TierId::SessionCache, reason = %reason, "Tier fetch failed");
                }
            }
            context
                .tier_reports
                .push(report(TierId::SessionCache, status, started.elapsed()));
        }

        let mut tasks: Vec<(TierId, FanOutTask)> = Vec::new();

        if tiers.contains(&TierId::RunCache) {
            match &request.run_id {
                Some(run_id) if !tickers.is_empty() => tasks.push((
                    TierId::RunCache,
                    spawn_timed(fetch_run_cache(
                        self.run_cache.clone(),
                        run_id.clone(),
                        tickers.clone(),
                    )),
                )),
                Some(_) => skip(&mut context, TierId::RunCache, "no tickers in query"),
                None => skip(&mut context, TierId::RunCache, "no run id"),
            }
        }

        if tiers.contains(&TierId::DurableStore) {
            let ticker_history: Vec<String> =
                if budget.user_context > self.config.ticker_history_min_budget {
                    tickers
                        .iter()
                        .take(self.config.ticker_history_limit)
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };
            tasks.push((
                TierId::DurableStore,
                spawn_timed(fetch_profile(
                    self.session.clone(),
                    self.profiles.clone(),
                    request.user_id.clone(),
                    ticker_history,
                )),
            ));
        }

        if tiers.contains(&TierId::SemanticIndex) {
            if budget.semantic_results == 0 {
                skip(&mut context, TierId::SemanticIndex, "zero semantic budget");
            } else {
                let limit = if budget.semantic_results < self.config.semantic_large_budget {
                    self.config.semantic_limit_small
                } else {
                    self.config.semantic_limit_large
                };
                tasks.push((
                    TierId::SemanticIndex,
                    spawn_timed(fetch_semantic(
                        self.semantic.clone(),
                        request.query.clone(),
                        tickers.clone(),
                        limit,
                    )),
                ));
            }
        }

        let fanout_started = Instant::now();
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.fanout_timeout_ms);

        for (tier, mut handle) in tasks {
            let (status, elapsed) = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok((fetch, elapsed))) => {
                    let status = fetch.status();
                    match fetch {
                        TierFetch::Hit(partial) => merge(&mut context, partial),
                        TierFetch::Absent => {}
                        TierFetch::Failed(reason) => {
                            warn!(tier = %tier, reason = %reason, "Tier fetch failed");
                        }
                    }
                    (status, elapsed)
                }
                Ok(Err(e)) => {
                    warn!(tier = %tier, error = %e, "Tier fetch task did not finish");
                    (
                        TierStatus::Failed {
                            reason: format!("fetch task failed: {e}"),
                        },
                        fanout_started.elapsed(),
                    )
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        tier = %tier,
                        timeout_ms = self.config.fanout_timeout_ms,
                        "Tier fetch timed out, continuing without it"
                    );
                    (TierStatus::TimedOut, fanout_started.elapsed())
                }
            };
            context.tier_reports.push(report(tier, status, elapsed));
        }

        context.tier_reports.sort_by_key(|r| r.tier);
        context.tiers_hit = context
            .tier_reports
            .iter()
            .filter(|r| r.status.completed())
            .map(|r| r.tier)
            .collect();
        context.latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            intent = %context.classification.intent,
            confidence = context.classification.confidence,
            tiers_hit = ?context.tiers_hit,
            latency_ms = context.latency_ms,
            "Context assembled"
        );
        Ok(context)
    }
}

fn report(tier: TierId, status: TierStatus, elapsed: Duration) -> TierReport {
    TierReport {
        tier,
        status,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}

fn skip(context: &mut Context, tier: TierId, reason: &str) {
    debug!(tier = %tier, reason, "Tier skipped");
    context.tier_reports.push(report(
        tier,
        TierStatus::Skipped {
            reason: reason.to_string(),
        },
        Duration::ZERO,
    ));
}

fn spawn_timed<F>(fetch: F) -> FanOutTask
where
    F: Future<Output = TierFetch<Partial>> + Send + 'static,
{
    tokio::spawn(async move {
        let started = Instant::now();
        let fetch = fetch.await;
        (fetch, started.elapsed())
    })
}

fn merge(context: &mut Context, partial: Partial) {
    match partial {
        Partial::RunCache(results) => context.cached_tool_results.extend(results),
        Partial::Durable(data) => {
            context.user_profile = data.profile;
            context.user_preferences = data.preferences;
            context.ticker_history = data.ticker_history;
        }
        Partial::Semantic(hits) => context.semantic_chunks = hits,
    }
}

async fn fetch_session(
    session: &SessionCache,
    session_id: &str,
    turns: usize,
) -> TierFetch<SessionData> {
    let (history, summary) = tokio::join!(
        session.get_history(session_id, turns),
        session.get_context_summary(session_id)
    );
    match (history, summary) {
        (Ok(history), Ok(summary)) => {
            if history.is_empty() && summary.is_none() {
                TierFetch::Absent
            } else {
                TierFetch::Hit(SessionData {
                    history: history.into_iter().map(ConversationMessage::from).collect(),
                    summary,
                })
            }
        }
        (Err(e), _) | (_, Err(e)) => TierFetch::Failed(e.to_string()),
    }
}

async fn fetch_run_cache(
    run_cache: Arc<RunCache>,
    run_id: String,
    tickers: Vec<String>,
) -> TierFetch<Partial> {
    let mut cached = BTreeMap::new();
    for ticker in &tickers {
        let (quote, ohlcv, news) = tokio::join!(
            run_cache.get_quote(&run_id, ticker),
            run_cache.get_ohlcv(&run_id, ticker, OHLCV_INTERVAL),
            run_cache.get_news(&run_id, ticker, NEWS_LIMIT)
        );
        for (tool, result) in [("quote", quote), ("ohlcv", ohlcv), ("news", news)] {
            match TierFetch::from_result(result) {
                TierFetch::Hit(value) => {
                    cached.insert(format!("{tool}:{ticker}"), value);
                }
                TierFetch::Absent => {}
                TierFetch::Failed(reason) => return TierFetch::Failed(reason),
            }
        }
    }
    debug!(run_id = %run_id, tickers = tickers.len(), hits = cached.len(), "Run cache lookup");
    if cached.is_empty() {
        TierFetch::Absent
    } else {
        TierFetch::Hit(Partial::RunCache(cached))
    }
}

/// Versioned read-through: a cached snapshot is used only when it was taken
/// at the profile's current version; otherwise the profile is read and the
/// snapshot rewritten.
async fn fetch_profile(
    session: Arc<SessionCache>,
    profiles: Arc<dyn ProfileTier>,
    user_id: String,
    tickers: Vec<String>,
) -> TierFetch<Partial> {
    let (snapshot, version) = tokio::join!(
        session.get_user_snapshot(&user_id),
        profiles.get_user_version(&user_id)
    );
    let version = match version {
        Ok(version) => version,
        Err(e) => return TierFetch::Failed(e.to_string()),
    };
    let snapshot = snapshot.unwrap_or_else(|e| {
        warn!(user_id = %user_id, error = %e, "User snapshot read failed, reading profile");
        None
    });

    let mut data = ProfileData::default();
    match snapshot.filter(|s| s.version == version) {
        Some(snapshot) => {
            debug!(user_id = %user_id, version, "User snapshot is current");
            data.profile = Some(snapshot.profile);
        }
        None => match profiles.get_user_summary(&user_id).await {
            Ok(Some(profile)) => {
                debug!(user_id = %user_id, version = profile.version, "User snapshot refreshed");
                if let Err(e) = session
                    .set_user_snapshot(&user_id, &profile, profile.version)
                    .await
                {
                    warn!(user_id = %user_id, error = %e, "Failed to cache user snapshot");
                }
                data.profile = Some(profile);
            }
            Ok(None) => {}
            Err(e) => return TierFetch::Failed(e.to_string()),
        },
    }
    data.preferences = data.profile.as_ref().map(UserProfileSummary::preferences);

    for ticker in &tickers {
        match profiles.get_ticker_summary(&user_id, ticker).await {
            Ok(Some(summary)) => data.ticker_history.push(summary),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    ticker = %ticker,
                    error = %e,
                    "Ticker summary read failed"
                );
                break;
            }
        }
    }

    if data.profile.is_none() && data.ticker_history.is_empty() {
        TierFetch::Absent
    } else {
        TierFetch::Hit(Partial::Durable(data))
    }
}

async fn fetch_semantic(
    semantic: Arc<dyn SemanticTier>,
    query: String,
    tickers: Vec<String>,
    limit: usize,
) -> TierFetch<Partial> {
    let must = (!tickers.is_empty()).then(|| SearchFilter::default().symbols(tickers));
    let hits = semantic.retrieve(&query, must.as_ref(), limit).await;
    let hits = hits.map(|hits| (!hits.is_empty()).then_some(Partial::Semantic(hits)));
    TierFetch::from_result(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use serde_json::json;

    #[tokio::test]
    async fn rejects_empty_ids() {
        let harness = Harness::new().unwrap();
        let aggregator = harness.aggregator();

        let err = aggregator
            .get_context(&ContextRequest::new("price of AAPL", "", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));

        let err = aggregator
            .get_context(&ContextRequest::new("price of AAPL", "s1", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn price_query_without_run_skips_run_cache() {
        let harness = Harness::new().unwrap();
        let context = harness
            .aggregator()
            .get_context(&ContextRequest::new("What's the price of AAPL?", "s1", "u1"))
            .await
            .unwrap();

        assert_eq!(context.classification.intent, QueryIntent::PriceOnly);
        assert!(context.tiers_hit.is_empty());
        assert_eq!(context.tier_reports.len(), 1);
        assert!(matches!(
            context.tier_reports[0].status,
            TierStatus::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn run_cache_results_keyed_by_tool_and_ticker() {
        let harness = Harness::new().unwrap();
        harness
            .run_cache
            .set_quote("r1", "AAPL", json!({"price": 150.0}))
            .await
            .unwrap();
        harness
            .run_cache
            .set_news("r1", "AAPL", NEWS_LIMIT, json!(["headline"]))
            .await
            .unwrap();

        let context = harness
            .aggregator()
            .get_context(&ContextRequest::new("price of AAPL", "s1", "u1").run_id("r1"))
            .await
            .unwrap();

        assert_eq!(context.cached_tool_results["quote:AAPL"], json!({"price": 150.0}));
        assert_eq!(context.cached_tool_results["news:AAPL"], json!(["headline"]));
        assert!(!context.cached_tool_results.contains_key("ohlcv:AAPL"));
        assert!(context.tiers_hit.contains(&TierId::RunCache));
    }

    #[tokio::test]
    async fn empty_tiers_fetch_as_absent() {
        let harness = Harness::new().unwrap();

        let run =
            fetch_run_cache(harness.run_cache.clone(), "r1".into(), vec!["AAPL".into()]).await;
        assert_eq!(run.status(), TierStatus::Absent);

        let semantic = fetch_semantic(
            harness.semantic.clone(),
            "apple earnings".into(),
            vec!["AAPL".into()],
            5,
        )
        .await;
        assert_eq!(semantic.status(), TierStatus::Absent);
    }

    #[tokio::test]
    async fn semantic_fetch_failure_carries_reason() {
        let semantic = fetch_semantic(
            Arc::new(crate::test_support::FailingSemantic),
            "apple earnings".into(),
            Vec::new(),
            5,
        )
        .await;
        assert!(matches!(semantic.status(), TierStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn budget_override_replaces_total_only() {
        let harness = Harness::new().unwrap();
        let context = harness
            .aggregator()
            .get_context(&ContextRequest::new("Should I buy NVDA", "s1", "u1").budget_override(900))
            .await
            .unwrap();
        let expected = TokenBudget::for_intent(QueryIntent::TradeDecision);
        assert_eq!(context.budget.total, 900);
        assert_eq!(context.budget.semantic_results, expected.semantic_results);
    }

    #[tokio::test]
    async fn zero_semantic_budget_skips_index() {
        let harness = Harness::new().unwrap();
        let context = harness
            .aggregator()
            .get_context(&ContextRequest::new("What are my preferences?", "s1", "u1"))
            .await
            .unwrap();
        assert!(context
            .tier_reports
            .iter()
            .all(|r| r.tier != TierId::SemanticIndex));
        assert!(context.tiers_hit.contains(&TierId::SessionCache));
        assert!(context.tiers_hit.contains(&TierId::DurableStore));
    }
}
