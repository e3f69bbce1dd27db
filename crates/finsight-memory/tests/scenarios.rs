//! End-to-end scenarios over in-process tiers.
//!
//! Each test wires a `ContextAggregator` and `Ingestor` to in-memory
//! backends through `Harness`, swapping in slow or failing tiers where the
//! scenario calls for degradation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use finsight_memory::test_support::{
    CountingProfiles, FailingCompleter, FailingKv, FailingSemantic, Harness, SlowProfiles,
    SlowSemantic, StaticCompleter,
};
use finsight_memory::{Classifier, ContextRequest};
use finsight_models::config::{ClassifierConfig, MemoryConfig};
use finsight_models::intent::{ClassificationStage, QueryIntent};
use finsight_models::payload::{DecisionRecord, NewDecision, TradeAction};
use finsight_models::profile::{ProfileUpdate, RiskTolerance, TradingStyle};
use finsight_models::semantic::SemanticHit;
use finsight_models::session::Role;
use finsight_models::tier::{TierId, TierStatus};
use rust_decimal_macros::dec;
use serde_json::json;

fn decision(user: &str, ticker: &str, action: TradeAction, sentiment: f64) -> NewDecision {
    NewDecision {
        user_id: user.to_string(),
        session_id: Some("s1".to_string()),
        ticker: ticker.to_string(),
        query: format!("Should I buy {ticker}?"),
        decision: DecisionRecord {
            action,
            confidence: Some(dec!(0.72)),
            rationale: "Earnings momentum".to_string(),
            target_price: Some(dec!(145.00)),
        },
        analyst_reports: Vec::new(),
        risk_assessment: None,
        sentiment: Some(sentiment),
    }
}

fn status_of(context: &finsight_models::context::Context, tier: TierId) -> Option<TierStatus> {
    context
        .tier_reports
        .iter()
        .find(|r| r.tier == tier)
        .map(|r| r.status.clone())
}

fn fallback_classifier(completer: Arc<dyn finsight_memory::Completer>) -> Classifier {
    Classifier::new(
        ClassifierConfig {
            fallback_enabled: true,
            ..ClassifierConfig::default()
        },
        Some(completer),
    )
}

// -- classification -------------------------------------------------------

#[tokio::test]
async fn fallback_overrides_unsure_stage_one() {
    let completer = Arc::new(StaticCompleter::new("`NEWS_SUMMARY 0.9`"));
    let classifier = fallback_classifier(completer.clone());

    let result = classifier.classify("hmm, anything notable?").await;
    assert_eq!(result.intent, QueryIntent::NewsSummary);
    assert_eq!(result.stage, ClassificationStage::Fallback);
    assert!((result.confidence - 0.9).abs() < 1e-6);
    assert_eq!(result.tiers_needed, QueryIntent::NewsSummary.required_tiers());
    assert_eq!(completer.calls(), 1);
}

#[tokio::test]
async fn confident_stage_one_skips_fallback() {
    let completer = Arc::new(StaticCompleter::new("CONVERSATION 0.99"));
    let classifier = fallback_classifier(completer.clone());

    let result = classifier.classify("What's the price of AAPL?").await;
    assert_eq!(result.intent, QueryIntent::PriceOnly);
    assert_eq!(result.stage, ClassificationStage::Deterministic);
    assert_eq!(completer.calls(), 0);
}

#[tokio::test]
async fn weaker_fallback_answer_is_ignored() {
    let completer = Arc::new(StaticCompleter::new("TRADE_DECISION 0.5"));
    let classifier = fallback_classifier(completer.clone());

    let result = classifier.classify("latest on rates").await;
    assert_eq!(result.intent, QueryIntent::NewsSummary);
    assert_eq!(result.stage, ClassificationStage::Deterministic);
    assert_eq!(completer.calls(), 1);
}

#[tokio::test]
async fn fallback_failures_keep_stage_one() {
    let failing = fallback_classifier(Arc::new(FailingCompleter));
    let result = failing.classify("hmm").await;
    assert_eq!(result.intent, QueryIntent::Unknown);
    assert_eq!(result.stage, ClassificationStage::Deterministic);

    let garbled = fallback_classifier(Arc::new(StaticCompleter::new("I am not sure")));
    let result = garbled.classify("hmm").await;
    assert_eq!(result.intent, QueryIntent::Unknown);
}

// -- degradation ----------------------------------------------------------

#[tokio::test]
async fn semantic_failure_leaves_other_tiers_intact() {
    let harness = Harness::new().unwrap();
    let ingestor = harness.ingestor();
    ingestor
        .store_decision(&decision("u1", "NVDA", TradeAction::Buy, 0.6))
        .await
        .unwrap();
    ingestor
        .cache_tool_result("r1", "quote", json!({"price": 912.4}), Some("NVDA"), None)
        .await
        .unwrap();

    let request = ContextRequest::new("Should I buy NVDA", "s1", "u1").run_id("r1");

    let healthy = harness
        .aggregator_with(
            harness.durable.clone(),
            Arc::new(SlowSemantic {
                delay: Duration::ZERO,
                hits: Vec::new(),
            }),
            harness.config.clone(),
        )
        .get_context(&request)
        .await
        .unwrap();

    let degraded = harness
        .aggregator_with(
            harness.durable.clone(),
            Arc::new(FailingSemantic),
            harness.config.clone(),
        )
        .get_context(&request)
        .await
        .unwrap();

    assert!(degraded.semantic_chunks.is_empty());
    assert!(matches!(
        status_of(&degraded, TierId::SemanticIndex),
        Some(TierStatus::Failed { .. })
    ));
    assert!(!degraded.tiers_hit.contains(&TierId::SemanticIndex));

    assert_eq!(degraded.user_profile, healthy.user_profile);
    assert_eq!(degraded.ticker_history, healthy.ticker_history);
    assert_eq!(degraded.cached_tool_results, healthy.cached_tool_results);
    assert_eq!(degraded.ticker_history.len(), 1);
    assert_eq!(degraded.ticker_history[0].last_decision, Some(TradeAction::Buy));
    assert_eq!(degraded.cached_tool_results["quote:NVDA"], json!({"price": 912.4}));
    assert!(degraded.tiers_hit.contains(&TierId::RunCache));
    assert!(degraded.tiers_hit.contains(&TierId::DurableStore));
}

#[tokio::test]
async fn slow_tier_is_abandoned_at_deadline() {
    let harness = Harness::new().unwrap();
    harness
        .ingestor()
        .update_preferences(
            "u1",
            &ProfileUpdate {
                risk_tolerance: Some(RiskTolerance::Aggressive),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

    let config = MemoryConfig {
        fanout_timeout_ms: 300,
        ..MemoryConfig::default()
    };
    let aggregator = harness.aggregator_with(
        harness.durable.clone(),
        Arc::new(SlowSemantic {
            delay: Duration::from_secs(5),
            hits: Vec::new(),
        }),
        config,
    );

    let context = aggregator
        .get_context(&ContextRequest::new("Should I buy NVDA", "s1", "u1"))
        .await
        .unwrap();

    assert_eq!(
        status_of(&context, TierId::SemanticIndex),
        Some(TierStatus::TimedOut)
    );
    assert!(context.latency_ms < 3_000.0);
    assert_eq!(
        context
            .user_preferences
            .as_ref()
            .and_then(|p| p.risk_tolerance),
        Some(RiskTolerance::Aggressive)
    );
}

#[tokio::test]
async fn everything_timing_out_is_still_a_context() {
    let harness = Harness::new().unwrap();
    let config = MemoryConfig {
        fanout_timeout_ms: 50,
        ..MemoryConfig::default()
    };
    let aggregator = harness.aggregator_with(
        Arc::new(SlowProfiles {
            delay: Duration::from_secs(5),
        }),
        Arc::new(SlowSemantic {
            delay: Duration::from_secs(5),
            hits: vec![SemanticHit {
                id: "late".to_string(),
                text: "never seen".to_string(),
                symbol: None,
                kind: "news".to_string(),
                score: 1.0,
            }],
        }),
        config,
    );

    let context = aggregator
        .get_context(&ContextRequest::new("Should I buy NVDA", "s1", "u1"))
        .await
        .unwrap();

    assert!(context.tiers_hit.is_empty());
    assert!(context.semantic_chunks.is_empty());
    assert!(context.user_profile.is_none());
    assert_eq!(context.classification.intent, QueryIntent::TradeDecision);
    assert_eq!(context.to_prompt_context(), "");
}

#[tokio::test]
async fn broken_session_store_does_not_block_profile() {
    let harness = Harness::with_session_store(Arc::new(FailingKv)).unwrap();
    let ingestor = harness.ingestor();
    ingestor
        .update_preferences(
            "u1",
            &ProfileUpdate {
                trading_style: Some(TradingStyle::Swing),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

    let context = harness
        .aggregator()
        .get_context(&ContextRequest::new("What are my preferences?", "s1", "u1"))
        .await
        .unwrap();

    assert!(matches!(
        status_of(&context, TierId::SessionCache),
        Some(TierStatus::Failed { .. })
    ));
    assert!(context.conversation_history.is_empty());
    assert_eq!(
        context.user_preferences.and_then(|p| p.trading_style),
        Some(TradingStyle::Swing)
    );
    assert!(context.tiers_hit.contains(&TierId::DurableStore));
}

// -- versioned snapshots ---------------------------------------------------

#[tokio::test]
async fn snapshot_read_through_follows_version() {
    let harness = Harness::new().unwrap();
    let ingestor = harness.ingestor();
    let profiles = Arc::new(CountingProfiles::new(harness.durable.clone()));
    let aggregator = harness.aggregator_with(
        profiles.clone(),
        harness.semantic.clone(),
        harness.config.clone(),
    );
    let request = ContextRequest::new("What are my preferences?", "s1", "u1");

    let v1 = ingestor
        .update_preferences(
            "u1",
            &ProfileUpdate {
                risk_tolerance: Some(RiskTolerance::Moderate),
                preferred_sectors: Some(vec!["semiconductors".to_string()]),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

    // First read misses and caches the snapshot.
    let first = aggregator.get_context(&request).await.unwrap();
    assert_eq!(profiles.summary_reads(), 1);
    assert!(harness.session.check_snapshot_version("u1", v1).await.unwrap());

    // Second read is served from the snapshot.
    let second = aggregator.get_context(&request).await.unwrap();
    assert_eq!(profiles.summary_reads(), 1);
    assert_eq!(first.user_preferences, second.user_preferences);

    // A decision bumps the version and drops the snapshot.
    ingestor
        .store_decision(&decision("u1", "AMD", TradeAction::Hold, 0.1))
        .await
        .unwrap();
    let v2 = harness.durable.get_user_version("u1").await.unwrap();
    assert!(v2 > v1);

    let third = aggregator.get_context(&request).await.unwrap();
    assert_eq!(profiles.summary_reads(), 2);
    assert_eq!(third.user_profile.as_ref().map(|p| p.total_decisions), Some(1));
    assert!(!harness.session.check_snapshot_version("u1", v1).await.unwrap());
    assert!(harness.session.check_snapshot_version("u1", v2).await.unwrap());
}

#[tokio::test]
async fn stale_snapshot_is_detected_without_invalidation() {
    let harness = Harness::new().unwrap();
    let profiles = Arc::new(CountingProfiles::new(harness.durable.clone()));
    let aggregator = harness.aggregator_with(
        profiles.clone(),
        harness.semantic.clone(),
        harness.config.clone(),
    );
    let request = ContextRequest::new("what is my risk tolerance", "s1", "u1");

    harness
        .durable
        .update_user_summary(
            "u1",
            &ProfileUpdate {
                risk_tolerance: Some(RiskTolerance::Conservative),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    aggregator.get_context(&request).await.unwrap();
    assert_eq!(profiles.summary_reads(), 1);

    // Written behind the cache's back: the snapshot stays but its version is old.
    harness
        .durable
        .update_user_summary(
            "u1",
            &ProfileUpdate {
                risk_tolerance: Some(RiskTolerance::Aggressive),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    let context = aggregator.get_context(&request).await.unwrap();
    assert_eq!(profiles.summary_reads(), 2);
    assert_eq!(
        context.user_preferences.and_then(|p| p.risk_tolerance),
        Some(RiskTolerance::Aggressive)
    );
}

// -- run cache and session -------------------------------------------------

#[tokio::test]
async fn run_cache_is_scoped_to_its_run() {
    let harness = Harness::new().unwrap();
    let ingestor = harness.ingestor();
    ingestor
        .cache_tool_result("r1", "quote", json!({"price": 150.0}), Some("AAPL"), None)
        .await
        .unwrap();
    let aggregator = harness.aggregator();

    let same_run = aggregator
        .get_context(&ContextRequest::new("What's the price of AAPL?", "s1", "u1").run_id("r1"))
        .await
        .unwrap();
    assert_eq!(same_run.cached_tool_results["quote:AAPL"], json!({"price": 150.0}));
    assert_eq!(same_run.tiers_hit, BTreeSet::from([TierId::RunCache]));

    let other_run = aggregator
        .get_context(&ContextRequest::new("What's the price of AAPL?", "s1", "u1").run_id("r2"))
        .await
        .unwrap();
    assert!(other_run.cached_tool_results.is_empty());
    assert_eq!(
        status_of(&other_run, TierId::RunCache),
        Some(TierStatus::Absent)
    );

    ingestor.finish_run("r1").await.unwrap();
    let finished = aggregator
        .get_context(&ContextRequest::new("What's the price of AAPL?", "s1", "u1").run_id("r1"))
        .await
        .unwrap();
    assert!(finished.cached_tool_results.is_empty());
}

#[tokio::test]
async fn conversation_uses_newest_turns_and_summary() {
    let harness = Harness::new().unwrap();
    let ingestor = harness.ingestor();
    for i in 0..30 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        ingestor
            .store_message("s1", "u1", role, &format!("turn {i}"), None)
            .await
            .unwrap();
    }
    harness
        .session
        .set_context_summary("s1", "Discussing chip stocks")
        .await
        .unwrap();

    let context = harness
        .aggregator()
        .get_context(&ContextRequest::new("can you explain more", "s1", "u1"))
        .await
        .unwrap();

    assert_eq!(context.classification.intent, QueryIntent::Conversation);
    assert_eq!(context.conversation_history.len(), 20);
    assert_eq!(context.conversation_history[0].content, "turn 10");
    assert_eq!(context.conversation_history[19].content, "turn 29");
    assert_eq!(context.context_summary.as_deref(), Some("Discussing chip stocks"));
    assert!(context.to_prompt_context().contains("turn 29"));
}

#[tokio::test]
async fn semantic_hits_are_filtered_by_ticker() {
    let harness = Harness::new().unwrap();
    let ingestor = harness.ingestor();
    for (symbol, text) in [
        ("AMD", "AMD datacenter GPU revenue rose sharply this quarter"),
        ("INTC", "Intel datacenter revenue slipped on weak demand"),
    ] {
        ingestor
            .ingest_document(finsight_models::semantic::Document {
                text: text.to_string(),
                symbol: Some(symbol.to_string()),
                kind: "news".to_string(),
                source: None,
                date: Some("2026-04-30".to_string()),
                user_id: None,
            })
            .await
            .unwrap();
    }

    let context = harness
        .aggregator()
        .get_context(&ContextRequest::new("latest news on AMD datacenter revenue", "s1", "u1"))
        .await
        .unwrap();

    assert_eq!(context.classification.intent, QueryIntent::NewsSummary);
    assert!(!context.semantic_chunks.is_empty());
    assert!(context
        .semantic_chunks
        .iter()
        .all(|hit| hit.symbol.as_deref() == Some("AMD")));
}

#[tokio::test]
async fn concurrent_calls_are_independent() {
    let harness = Harness::new().unwrap();
    let ingestor = harness.ingestor();
    ingestor
        .store_decision(&decision("u1", "TSLA", TradeAction::Sell, -0.4))
        .await
        .unwrap();
    let aggregator = Arc::new(harness.aggregator());

    let mut handles = Vec::new();
    for i in 0..8 {
        let aggregator = aggregator.clone();
        handles.push(tokio::spawn(async move {
            let request = ContextRequest::new("Should I sell TSLA", format!("s{i}"), "u1");
            aggregator.get_context(&request).await
        }));
    }
    for handle in handles {
        let context = handle.await.unwrap().unwrap();
        assert_eq!(context.classification.intent, QueryIntent::TradeDecision);
        assert_eq!(context.ticker_history.len(), 1);
        assert_eq!(context.ticker_history[0].ticker, "TSLA");
    }
}
