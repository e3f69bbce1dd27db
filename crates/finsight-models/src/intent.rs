use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tier::TierId;

/// Classified purpose of a query. Drives tier selection and the token budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    PriceOnly,
    TickerInfo,
    NewsSummary,
    TradeDecision,
    UserHistory,
    UserPreferences,
    SemanticSearch,
    Conversation,
    Unknown,
}

impl QueryIntent {
    /// Every intent the classifier can route, in declaration order.
    pub const ROUTABLE: [QueryIntent; 8] = [
        QueryIntent::PriceOnly,
        QueryIntent::TickerInfo,
        QueryIntent::NewsSummary,
        QueryIntent::TradeDecision,
        QueryIntent::UserHistory,
        QueryIntent::UserPreferences,
        QueryIntent::SemanticSearch,
        QueryIntent::Conversation,
    ];

    /// Upper-case label used in the classifier fallback grammar.
    pub fn label(&self) -> &'static str {
        match self {
            QueryIntent::PriceOnly => "PRICE_ONLY",
            QueryIntent::TickerInfo => "TICKER_INFO",
            QueryIntent::NewsSummary => "NEWS_SUMMARY",
            QueryIntent::TradeDecision => "TRADE_DECISION",
            QueryIntent::UserHistory => "USER_HISTORY",
            QueryIntent::UserPreferences => "USER_PREFERENCES",
            QueryIntent::SemanticSearch => "SEMANTIC_SEARCH",
            QueryIntent::Conversation => "CONVERSATION",
            QueryIntent::Unknown => "UNKNOWN",
        }
    }

    /// Parse a fallback label (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        let upper = label.trim().to_ascii_uppercase();
        QueryIntent::ROUTABLE
            .iter()
            .chain(std::iter::once(&QueryIntent::Unknown))
            .find(|intent| intent.label() == upper)
            .copied()
    }

    /// Intents whose confidence gets the ticker bonus when symbols are present.
    pub fn is_ticker_relevant(&self) -> bool {
        matches!(
            self,
            QueryIntent::PriceOnly
                | QueryIntent::TickerInfo
                | QueryIntent::NewsSummary
                | QueryIntent::TradeDecision
        )
    }

    /// Static intent → tiers routing table.
    pub fn required_tiers(&self) -> BTreeSet<TierId> {
        let tiers: &[TierId] = match self {
            QueryIntent::PriceOnly => &[TierId::RunCache],
            QueryIntent::TickerInfo => &[TierId::RunCache, TierId::SemanticIndex],
            QueryIntent::NewsSummary => &[TierId::RunCache, TierId::SemanticIndex],
            QueryIntent::TradeDecision => &[
                TierId::RunCache,
                TierId::DurableStore,
                TierId::SemanticIndex,
            ],
            QueryIntent::UserHistory => &[TierId::SessionCache, TierId::DurableStore],
            QueryIntent::UserPreferences => &[TierId::SessionCache, TierId::DurableStore],
            QueryIntent::SemanticSearch => &[TierId::SemanticIndex],
            QueryIntent::Conversation => &[TierId::SessionCache],
            // Conservative default
            QueryIntent::Unknown => &[TierId::SessionCache, TierId::RunCache],
        };
        tiers.iter().copied().collect()
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which classifier stage produced the final intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStage {
    Deterministic,
    Fallback,
}

/// Result of classifying one query. Produced per query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub intent: QueryIntent,
    /// 0.0 to 1.0.
    pub confidence: f32,
    /// Normalized (upper-case) ticker symbols.
    pub tickers: BTreeSet<String>,
    /// Text fragments that matched intent patterns, in match order.
    pub keywords: Vec<String>,
    pub tiers_needed: BTreeSet<TierId>,
    pub stage: ClassificationStage,
}

impl ClassificationResult {
    /// The worst-case result: unknown intent with the conservative tier set.
    pub fn unknown() -> Self {
        Self {
            intent: QueryIntent::Unknown,
            confidence: 0.0,
            tickers: BTreeSet::new(),
            keywords: Vec::new(),
            tiers_needed: QueryIntent::Unknown.required_tiers(),
            stage: ClassificationStage::Deterministic,
        }
    }
}
