use serde::{Deserialize, Serialize};

use crate::intent::QueryIntent;

/// Per-tier token allocation for one query.
///
/// Sub-budgets are soft hints; `total` is not required to equal their sum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBudget {
    pub conversation: u32,
    pub user_context: u32,
    pub semantic_results: u32,
    pub tool_results: u32,
    pub total: u32,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(1500, 500, 2000, 1000, 4000)
    }
}

impl TokenBudget {
    pub const fn new(
        conversation: u32,
        user_context: u32,
        semantic_results: u32,
        tool_results: u32,
        total: u32,
    ) -> Self {
        Self {
            conversation,
            user_context,
            semantic_results,
            tool_results,
            total,
        }
    }

    /// Fixed budget for an intent. Unmapped intents get the default budget.
    pub fn for_intent(intent: QueryIntent) -> Self {
        match intent {
            QueryIntent::PriceOnly => Self::new(200, 0, 0, 400, 600),
            QueryIntent::TickerInfo => Self::new(300, 200, 500, 1000, 2000),
            QueryIntent::NewsSummary => Self::new(300, 200, 1500, 500, 2500),
            QueryIntent::TradeDecision => Self::new(1000, 800, 2000, 1200, 5000),
            QueryIntent::UserHistory => Self::new(2000, 500, 500, 0, 3000),
            QueryIntent::UserPreferences => Self::new(500, 1500, 0, 0, 2000),
            QueryIntent::SemanticSearch => Self::new(500, 300, 2500, 200, 3500),
            QueryIntent::Conversation => Self::new(1500, 500, 1000, 500, 3500),
            QueryIntent::Unknown => Self::default(),
        }
    }

    /// Replace the overall cap, keeping the per-tier hints.
    pub fn with_total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }
}

/// Budget lookup for an intent.
pub fn budget_for(intent: QueryIntent) -> TokenBudget {
    TokenBudget::for_intent(intent)
}
