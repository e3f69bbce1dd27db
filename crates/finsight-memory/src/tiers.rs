//! Read-side seams between the aggregator and the tier stores.
//!
//! The aggregator only reads profiles and semantic chunks through these
//! traits, so tests can swap in slow or failing tiers.

use async_trait::async_trait;
use finsight_models::profile::{TickerDecisionSummary, UserProfileSummary};
use finsight_models::semantic::SemanticHit;
use finsight_models::tier::TierStatus;
use finsight_store::{DurableStore, SearchFilter, SemanticIndex};

use crate::error::MemoryError;

/// Outcome of one tier fetch.
#[derive(Debug)]
pub enum TierFetch<T> {
    Hit(T),
    Absent,
    Failed(String),
}

impl<T> TierFetch<T> {
    /// `Ok(None)` is a completed fetch with nothing to contribute.
    pub fn from_result<E: std::fmt::Display>(result: Result<Option<T>, E>) -> Self {
        match result {
            Ok(Some(value)) => TierFetch::Hit(value),
            Ok(None) => TierFetch::Absent,
            Err(e) => TierFetch::Failed(e.to_string()),
        }
    }

    pub fn status(&self) -> TierStatus {
        match self {
            TierFetch::Hit(_) => TierStatus::Hit,
            TierFetch::Absent => TierStatus::Absent,
            TierFetch::Failed(reason) => TierStatus::Failed {
                reason: reason.clone(),
            },
        }
    }
}

/// Profile reads served by the durable store.
#[async_trait]
pub trait ProfileTier: Send + Sync {
    async fn get_user_version(&self, user_id: &str) -> Result<u64, MemoryError>;

    async fn get_user_summary(&self, user_id: &str)
        -> Result<Option<UserProfileSummary>, MemoryError>;

    async fn get_ticker_summary(
        &self,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<TickerDecisionSummary>, MemoryError>;
}

#[async_trait]
impl ProfileTier for DurableStore {
    async fn get_user_version(&self, user_id: &str) -> Result<u64, MemoryError> {
        Ok(DurableStore::get_user_version(self, user_id).await?)
    }

    async fn get_user_summary(
        &self,
        user_id: &str,
    ) -> Result<Option<UserProfileSummary>, MemoryError> {
        Ok(DurableStore::get_user_summary(self, user_id).await?)
    }

    async fn get_ticker_summary(
        &self,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<TickerDecisionSummary>, MemoryError> {
        Ok(DurableStore::get_ticker_summary(self, user_id, ticker).await?)
    }
}

/// Query-text retrieval served by the semantic index.
#[async_trait]
pub trait SemanticTier: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        must: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<SemanticHit>, MemoryError>;
}

#[async_trait]
impl SemanticTier for SemanticIndex {
    async fn retrieve(
        &self,
        query: &str,
        must: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        Ok(SemanticIndex::retrieve(self, query, must, None, limit).await?)
    }
}
