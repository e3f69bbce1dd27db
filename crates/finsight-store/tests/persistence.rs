use std::sync::Arc;

use finsight_models::config::{DurableConfig, SemanticConfig};
use finsight_models::payload::{DecisionRecord, NewDecision, TradeAction};
use finsight_models::profile::{ProfileUpdate, RiskTolerance};
use finsight_models::semantic::ChunkPayload;
use finsight_models::tier::BackendKind;
use finsight_store::{DurableStore, HashingEmbedder, SearchFilter, SemanticIndex};
use rust_decimal_macros::dec;

fn buy(user: &str, ticker: &str, sentiment: f64) -> NewDecision {
    NewDecision {
        user_id: user.to_string(),
        session_id: None,
        ticker: ticker.to_string(),
        query: format!("Should I buy {ticker}?"),
        decision: DecisionRecord {
            action: TradeAction::Buy,
            confidence: Some(dec!(0.8)),
            rationale: "Trend intact".to_string(),
            target_price: None,
        },
        analyst_reports: Vec::new(),
        risk_assessment: None,
        sentiment: Some(sentiment),
    }
}

#[tokio::test]
async fn durable_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.db");
    let config = DurableConfig {
        db_path: Some(path.to_str().unwrap().to_string()),
    };

    {
        let store = DurableStore::connect(&config).unwrap();
        assert_eq!(store.backend(), BackendKind::Sqlite);
        store
            .update_user_summary(
                "u1",
                &ProfileUpdate {
                    risk_tolerance: Some(RiskTolerance::Aggressive),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        store.save_decision_with_summaries(&buy("u1", "NVDA", 0.9)).await.unwrap();
    }

    let store = DurableStore::connect(&config).unwrap();
    let profile = store.get_user_summary("u1").await.unwrap().unwrap();
    assert_eq!(profile.risk_tolerance, Some(RiskTolerance::Aggressive));
    assert_eq!(profile.total_decisions, 1);
    assert_eq!(profile.version, 2);
    assert_eq!(store.get_recent_decisions("u1", 5, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_durable_store_degrades_in_process() {
    let config = DurableConfig {
        db_path: Some("/nonexistent/finsight/durable.db".to_string()),
    };
    let store = DurableStore::connect(&config).unwrap();
    assert_eq!(store.backend(), BackendKind::InProcess);
    store.save_decision_with_summaries(&buy("u1", "AAPL", 0.1)).await.unwrap();
    assert_eq!(store.get_user_version("u1").await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_decisions_for_one_ticker_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.db");
    let store = Arc::new(DurableStore::open(path.to_str().unwrap()).unwrap());

    let mut handles = Vec::new();
    for i in 0..12 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .save_decision_with_summaries(&buy("u1", "AMD", i as f64 / 10.0))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().summaries_current);
    }

    let summary = store.get_ticker_summary("u1", "AMD").await.unwrap().unwrap();
    assert_eq!(summary.total_analyses, 12);
    assert_eq!(summary.recent_decisions.len(), 5);
    assert_eq!(store.get_user_version("u1").await.unwrap(), 12);
}

#[tokio::test]
async fn semantic_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = SemanticConfig {
        db_path: Some(dir.path().join("semantic.db").to_str().unwrap().to_string()),
        ..SemanticConfig::default()
    };
    let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimension));

    {
        let index = SemanticIndex::connect(&config, embedder.clone()).unwrap();
        index
            .upsert_snippets(vec![ChunkPayload {
                text: "Apple raises dividend and expands buyback".to_string(),
                symbol: Some("AAPL".to_string()),
                kind: "news".to_string(),
                source: Some("wire".to_string()),
                date: Some("2024-05-02".to_string()),
                user_id: None,
            }])
            .await
            .unwrap();
    }

    let index = SemanticIndex::connect(&config, embedder).unwrap();
    assert_eq!(index.count().await.unwrap(), 1);
    let must = SearchFilter::default().symbols(["AAPL"]).date_from("2024-01-01");
    let hits = index.retrieve("apple buyback", Some(&must), None, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, "news");
}
