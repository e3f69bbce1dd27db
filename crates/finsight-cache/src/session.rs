use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use finsight_models::cache_schema::key_patterns;
use finsight_models::config::SessionConfig;
use finsight_models::profile::UserProfileSummary;
use finsight_models::session::{SessionTurn, UserSnapshot};
use finsight_models::tier::BackendKind;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::store::KvStore;

/// Hot per-session state: bounded turn history, session blobs, conversation
/// summaries, agent scratch state and version-stamped user snapshots.
pub struct SessionCache {
    store: Arc<dyn KvStore>,
    config: SessionConfig,
}

impl SessionCache {
    pub fn new(store: Arc<dyn KvStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn backend(&self) -> BackendKind {
        self.store.backend()
    }

    /// Maximum number of messages kept per session.
    pub fn history_cap(&self) -> usize {
        self.config.max_turns * 2
    }

    fn prefix(&self) -> &str {
        &self.config.key_prefix
    }

    fn secs(seconds: u64) -> Duration {
        Duration::from_secs(seconds)
    }

    // Session blob

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Value>, CacheError> {
        require_id("session_id", session_id)?;
        self.store
            .get(&key_patterns::session(self.prefix(), session_id))
            .await
    }

    pub async fn set_session(
        &self,
        session_id: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        require_id("session_id", session_id)?;
        let ttl = ttl.unwrap_or(Self::secs(self.config.session_ttl_seconds));
        self.store
            .set(&key_patterns::session(self.prefix(), session_id), data, ttl)
            .await
    }

    /// Shallow-merge `updates` into the stored session object and return the result.
    pub async fn update_session(
        &self,
        session_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Value, CacheError> {
        let mut merged = match self.get_session(session_id).await? {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        merged.extend(updates);
        let merged = Value::Object(merged);
        self.set_session(session_id, merged.clone(), None).await?;
        Ok(merged)
    }

    // History

    pub async fn add_to_history(
        &self,
        session_id: &str,
        turn: &SessionTurn,
    ) -> Result<(), CacheError> {
        require_id("session_id", session_id)?;
        let item = serde_json::to_value(turn)?;
        self.store
            .push_capped(
                &key_patterns::history(self.prefix(), session_id),
                item,
                self.history_cap(),
                Self::secs(self.config.history_ttl_seconds),
            )
            .await
    }

    /// The newest `limit_turns * 2` messages, oldest first.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit_turns: usize,
    ) -> Result<Vec<SessionTurn>, CacheError> {
        require_id("session_id", session_id)?;
        let key = key_patterns::history(self.prefix(), session_id);
        let items = match self.store.get(&key).await? {
            Some(Value::Array(items)) => items,
            Some(_) => {
                warn!(key, "History entry is not a list, ignoring");
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        let take = limit_turns.saturating_mul(2);
        let skip = items.len().saturating_sub(take);
        let turns = items
            .into_iter()
            .skip(skip)
            .filter_map(|item| match serde_json::from_value::<SessionTurn>(item) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    warn!(key, error = %e, "Skipping malformed history entry");
                    None
                }
            })
            .collect();
        Ok(turns)
    }

    pub async fn clear_history(&self, session_id: &str) -> Result<(), CacheError> {
        require_id("session_id", session_id)?;
        self.store
            .delete(&key_patterns::history(self.prefix(), session_id))
            .await?;
        Ok(())
    }

    // Conversation summary

    pub async fn set_context_summary(
        &self,
        session_id: &str,
        summary: &str,
    ) -> Result<(), CacheError> {
        require_id("session_id", session_id)?;
        self.store
            .set(
                &key_patterns::context_summary(self.prefix(), session_id),
                Value::String(summary.to_string()),
                Self::secs(self.config.session_ttl_seconds),
            )
            .await
    }

    pub async fn get_context_summary(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, CacheError> {
        require_id("session_id", session_id)?;
        let value = self
            .store
            .get(&key_patterns::context_summary(self.prefix(), session_id))
            .await?;
        Ok(match value {
            Some(Value::String(summary)) => Some(summary),
            _ => None,
        })
    }

    // User snapshot

    /// Cache a profile stamped with the version it was read at.
    pub async fn set_user_snapshot(
        &self,
        user_id: &str,
        profile: &UserProfileSummary,
        version: u64,
    ) -> Result<(), CacheError> {
        require_id("user_id", user_id)?;
        let snapshot = UserSnapshot {
            version,
            profile: profile.clone(),
            cached_at: Utc::now(),
        };
        self.store
            .set(
                &key_patterns::user_snapshot(self.prefix(), user_id),
                serde_json::to_value(&snapshot)?,
                Self::secs(self.config.default_ttl_seconds),
            )
            .await
    }

    /// The cached snapshot, if any. Callers must compare its version before trusting it.
    pub async fn get_user_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<UserSnapshot>, CacheError> {
        require_id("user_id", user_id)?;
        let key = key_patterns::user_snapshot(self.prefix(), user_id);
        match self.store.get(&key).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(e) => {
                    warn!(key, error = %e, "Discarding malformed user snapshot");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Whether a cached snapshot exists and was taken at `current_version`.
    pub async fn check_snapshot_version(
        &self,
        user_id: &str,
        current_version: u64,
    ) -> Result<bool, CacheError> {
        let fresh = self
            .get_user_snapshot(user_id)
            .await?
            .is_some_and(|s| s.version == current_version);
        debug!(user_id, current_version, fresh, "Checked user snapshot version");
        Ok(fresh)
    }

    pub async fn invalidate_user_snapshot(&self, user_id: &str) -> Result<(), CacheError> {
        require_id("user_id", user_id)?;
        self.store
            .delete(&key_patterns::user_snapshot(self.prefix(), user_id))
            .await?;
        Ok(())
    }

    // Agent scratch state

    pub async fn cache_agent_state(
        &self,
        session_id: &str,
        agent: &str,
        state: Value,
    ) -> Result<(), CacheError> {
        require_id("session_id", session_id)?;
        self.store
            .set(
                &key_patterns::agent_state(self.prefix(), session_id, agent),
                state,
                Self::secs(self.config.agent_state_ttl_seconds),
            )
            .await
    }

    pub async fn get_agent_state(
        &self,
        session_id: &str,
        agent: &str,
    ) -> Result<Option<Value>, CacheError> {
        require_id("session_id", session_id)?;
        self.store
            .get(&key_patterns::agent_state(self.prefix(), session_id, agent))
            .await
    }

    /// Remove history, session blob and summary for one session.
    pub async fn clear_session(&self, session_id: &str) -> Result<(), CacheError> {
        require_id("session_id", session_id)?;
        let prefix = self.prefix();
        for key in [
            key_patterns::history(prefix, session_id),
            key_patterns::session(prefix, session_id),
            key_patterns::context_summary(prefix, session_id),
        ] {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}

pub(crate) fn require_id(name: &str, value: &str) -> Result<(), CacheError> {
    if value.trim().is_empty() {
        return Err(CacheError::InvalidKey(format!("{name} must not be empty")));
    }
    Ok(())
}
