//! Write path into the memory tiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use finsight_cache::{RunCache, RunCacheKey, SessionCache};
use finsight_models::config::MemoryConfig;
use finsight_models::context::truncate_chars;
use finsight_models::payload::NewDecision;
use finsight_models::profile::ProfileUpdate;
use finsight_models::semantic::{ChunkPayload, Document};
use finsight_models::session::{Role, SessionTurn};
use finsight_store::{DecisionOutcome, DurableStore, SearchFilter, SemanticIndex};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::chunker::chunk_text;
use crate::error::MemoryError;

/// Payload kind of conversation summaries in the semantic index.
pub const MEMORY_KIND: &str = "memory";
const MEMORY_SOURCE: &str = "conversation";
/// Longest recalled memory text.
const RECALL_MAX_CHARS: usize = 600;

/// Writes conversation turns, decisions, preferences, tool results and
/// documents into the tier that owns them.
pub struct Ingestor {
    session: Arc<SessionCache>,
    run_cache: Arc<RunCache>,
    durable: Arc<DurableStore>,
    semantic: Arc<SemanticIndex>,
    config: MemoryConfig,
}

impl Ingestor {
    pub fn new(
        session: Arc<SessionCache>,
        run_cache: Arc<RunCache>,
        durable: Arc<DurableStore>,
        semantic: Arc<SemanticIndex>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            session,
            run_cache,
            durable,
            semantic,
            config,
        }
    }

    /// Append a turn to the session history. The durable conversation log
    /// is left alone; see [`Ingestor::persist_message`].
    pub async fn store_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), MemoryError> {
        let turn = SessionTurn::new(role, content).with_metadata(metadata.unwrap_or_default());
        self.session.add_to_history(session_id, &turn).await?;
        debug!(session_id, user_id, role = %role, "Stored session turn");
        Ok(())
    }

    /// Append a turn to the permanent conversation log.
    pub async fn persist_message(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        role: Role,
        content: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<i64, MemoryError> {
        Ok(self
            .durable
            .save_message(user_id, session_id, role, content, metadata.unwrap_or_default())
            .await?)
    }

    /// Record a decision with its summaries, then drop the user's cached
    /// profile snapshot so the next read sees the new version.
    pub async fn store_decision(
        &self,
        decision: &NewDecision,
    ) -> Result<DecisionOutcome, MemoryError> {
        let outcome = self.durable.save_decision_with_summaries(decision).await?;
        if let Err(e) = self.session.invalidate_user_snapshot(&decision.user_id).await {
            warn!(user_id = %decision.user_id, error = %e, "Failed to invalidate user snapshot");
        }
        Ok(outcome)
    }

    /// Merge preference changes into the profile. Returns the new version.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<u64, MemoryError> {
        let version = self.durable.update_user_summary(user_id, update).await?;
        if let Err(e) = self.session.invalidate_user_snapshot(user_id).await {
            warn!(user_id, error = %e, "Failed to invalidate user snapshot");
        }
        info!(user_id, version, "Preferences updated");
        Ok(version)
    }

    /// Cache a provider result for the rest of the run under the tool's TTL.
    pub async fn cache_tool_result(
        &self,
        run_id: &str,
        tool: &str,
        result: Value,
        ticker: Option<&str>,
        params: Option<BTreeMap<String, Value>>,
    ) -> Result<(), MemoryError> {
        let mut key = RunCacheKey::new(run_id, tool);
        if let Some(ticker) = ticker {
            key = key.ticker(ticker);
        }
        if let Some(params) = params {
            key = key.params(params);
        }
        self.run_cache.set(&key, result).await?;
        Ok(())
    }

    /// Drop everything cached for a finished run.
    pub async fn finish_run(&self, run_id: &str) -> Result<u64, MemoryError> {
        Ok(self.run_cache.invalidate_run(run_id).await?)
    }

    /// Drop a session's history, blob and summary.
    pub async fn clear_session(&self, session_id: &str) -> Result<(), MemoryError> {
        self.session.clear_session(session_id).await?;
        Ok(())
    }

    /// Chunk, embed and index a document. Returns the chunk ids.
    pub async fn ingest_document(&self, document: Document) -> Result<Vec<String>, MemoryError> {
        let semantic_config = self.semantic.config();
        let pieces = chunk_text(
            &document.text,
            semantic_config.chunk_max_chars,
            semantic_config.chunk_overlap_chars,
        );
        let symbol = document.symbol.map(|s| s.to_uppercase());
        let snippets: Vec<ChunkPayload> = pieces
            .into_iter()
            .map(|text| ChunkPayload {
                text,
                symbol: symbol.clone(),
                kind: document.kind.clone(),
                source: document.source.clone(),
                date: document.date.clone(),
                user_id: document.user_id.clone(),
            })
            .collect();

        let ids = self.semantic.upsert_snippets(snippets).await?;
        info!(
            kind = %document.kind,
            symbol = ?symbol,
            chunks = ids.len(),
            "Document ingested"
        );
        Ok(ids)
    }

    /// Index the session's recent history as one memory chunk for the user.
    ///
    /// Keeps the newest text when the history is longer than the summary
    /// limit. Returns the chunk id, or `None` for an empty history.
    pub async fn ingest_conversation_summary(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, MemoryError> {
        if user_id.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "user_id must not be empty".to_string(),
            ));
        }
        let history = self
            .session
            .get_history(session_id, self.config.history_turns)
            .await?;
        if history.is_empty() {
            return Ok(None);
        }

        let transcript = history
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n");
        let text = tail_chars(&transcript, self.config.summary_max_chars);

        let snippet = ChunkPayload {
            text,
            symbol: None,
            kind: MEMORY_KIND.to_string(),
            source: Some(MEMORY_SOURCE.to_string()),
            date: Some(Utc::now().format("%Y-%m-%d").to_string()),
            user_id: Some(user_id.to_string()),
        };
        let id = self.semantic.upsert_snippets(vec![snippet]).await?.into_iter().next();
        debug!(user_id, session_id, turns = history.len(), "Conversation summary indexed");
        Ok(id)
    }

    /// Memory chunks of one user relevant to `query`, each cut to 600 characters.
    pub async fn recall_memories(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryError> {
        let filter = SearchFilter::default()
            .kinds([MEMORY_KIND])
            .users([user_id]);
        let hits = self
            .semantic
            .retrieve(query, Some(&filter), None, limit)
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| truncate_chars(&hit.text, RECALL_MAX_CHARS))
            .collect())
    }
}

/// The last `max` characters of `text`.
fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use serde_json::json;

    #[test]
    fn tail_keeps_newest_text() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[tokio::test]
    async fn store_message_only_touches_session() {
        let harness = Harness::new().unwrap();
        let ingestor = harness.ingestor();
        ingestor
            .store_message("s1", "u1", Role::User, "hello", None)
            .await
            .unwrap();

        let history = harness.session.get_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
        let logged = harness
            .durable
            .get_conversation_history("u1", None, 10)
            .await
            .unwrap();
        assert!(logged.is_empty());
    }

    #[tokio::test]
    async fn cache_tool_result_uses_run_scope() {
        let harness = Harness::new().unwrap();
        let ingestor = harness.ingestor();
        ingestor
            .cache_tool_result("r1", "quote", json!({"price": 150.0}), Some("aapl"), None)
            .await
            .unwrap();

        assert_eq!(
            harness.run_cache.get_quote("r1", "AAPL").await.unwrap(),
            Some(json!({"price": 150.0}))
        );
        assert_eq!(harness.run_cache.get_quote("r2", "AAPL").await.unwrap(), None);
        assert_eq!(ingestor.finish_run("r1").await.unwrap(), 1);
        assert_eq!(harness.run_cache.get_quote("r1", "AAPL").await.unwrap(), None);
    }

    #[tokio::test]
    async fn document_chunks_are_searchable_by_symbol() {
        let harness = Harness::new().unwrap();
        let ingestor = harness.ingestor();
        let ids = ingestor
            .ingest_document(Document {
                text: "Nvidia datacenter revenue doubled on accelerator demand.".to_string(),
                symbol: Some("nvda".to_string()),
                kind: "news".to_string(),
                source: Some("wire".to_string()),
                date: Some("2026-05-01".to_string()),
                user_id: None,
            })
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let filter = SearchFilter::default().symbols(["NVDA"]);
        let hits = harness
            .semantic
            .retrieve("datacenter revenue", Some(&filter), None, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].symbol.as_deref(), Some("NVDA"));
    }

    #[tokio::test]
    async fn conversation_summary_round_trip() {
        let harness = Harness::new().unwrap();
        let ingestor = harness.ingestor();
        assert_eq!(
            ingestor.ingest_conversation_summary("u1", "s1").await.unwrap(),
            None
        );

        ingestor
            .store_message("s1", "u1", Role::User, "I like semiconductor stocks", None)
            .await
            .unwrap();
        ingestor
            .store_message("s1", "u1", Role::Assistant, "Noted your semiconductor focus", None)
            .await
            .unwrap();
        let id = ingestor.ingest_conversation_summary("u1", "s1").await.unwrap();
        assert!(id.is_some());

        let recalled = ingestor
            .recall_memories("u1", "semiconductor", 3)
            .await
            .unwrap();
        assert_eq!(recalled.len(), 1);
        assert!(recalled[0].starts_with("user: I like semiconductor stocks"));
        assert!(ingestor
            .recall_memories("someone-else", "semiconductor", 3)
            .await
            .unwrap()
            .is_empty());
    }
}
