use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::budget::TokenBudget;
use crate::intent::ClassificationResult;
use crate::profile::{TickerDecisionSummary, UserPreferences, UserProfileSummary};
use crate::semantic::SemanticHit;
use crate::session::{Role, SessionTurn};
use crate::tier::{TierId, TierReport};

/// Rough characters-per-token ratio used for budget trimming.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl From<SessionTurn> for ConversationMessage {
    fn from(turn: SessionTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content,
        }
    }
}

/// Merged result of one aggregation call. Owned by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub conversation_history: Vec<ConversationMessage>,
    pub context_summary: Option<String>,
    pub user_profile: Option<UserProfileSummary>,
    pub user_preferences: Option<UserPreferences>,
    pub ticker_history: Vec<TickerDecisionSummary>,
    pub semantic_chunks: Vec<SemanticHit>,
    pub cached_tool_results: BTreeMap<String, serde_json::Value>,
    pub classification: ClassificationResult,
    pub budget: TokenBudget,
    pub latency_ms: f64,
    /// Tiers whose fetch completed without error before the deadline.
    pub tiers_hit: BTreeSet<TierId>,
    pub tier_reports: Vec<TierReport>,
}

impl Context {
    /// A context carrying only the classification. Valid output when no tier answers.
    pub fn empty(classification: ClassificationResult, budget: TokenBudget) -> Self {
        Self {
            conversation_history: Vec::new(),
            context_summary: None,
            user_profile: None,
            user_preferences: None,
            ticker_history: Vec::new(),
            semantic_chunks: Vec::new(),
            cached_tool_results: BTreeMap::new(),
            classification,
            budget,
            latency_ms: 0.0,
            tiers_hit: BTreeSet::new(),
            tier_reports: Vec::new(),
        }
    }

    /// Render the context as a prompt block.
    ///
    /// Each section is trimmed to its sub-budget and the whole to `budget.total`.
    /// Sections with a zero allocation are left out.
    pub fn to_prompt_context(&self) -> String {
        let mut parts = Vec::new();
        let budget = &self.budget;

        if budget.user_context > 0 {
            let mut user = String::new();
            if let Some(prefs) = self.user_preferences.as_ref().filter(|p| !p.is_empty()) {
                user.push_str("User preferences:");
                if let Some(risk) = prefs.risk_tolerance {
                    user.push_str(&format!(" risk tolerance {risk};"));
                }
                if let Some(style) = prefs.trading_style {
                    user.push_str(&format!(" trading style {style};"));
                }
                if !prefs.preferred_sectors.is_empty() {
                    user.push_str(&format!(
                        " preferred sectors {};",
                        prefs.preferred_sectors.join(", ")
                    ));
                }
            }
            for summary in &self.ticker_history {
                if !user.is_empty() {
                    user.push('\n');
                }
                user.push_str(&format!(
                    "{}: {} analyses, last decision {}",
                    summary.ticker,
                    summary.total_analyses,
                    summary
                        .last_decision
                        .map(|d| d.as_str())
                        .unwrap_or("none"),
                ));
                if let Some(avg) = summary.avg_sentiment {
                    user.push_str(&format!(", avg sentiment {avg:.2}"));
                }
            }
            if !user.is_empty() {
                parts.push(truncate_chars(&user, tokens_to_chars(budget.user_context)));
            }
        }

        if budget.conversation > 0 {
            let limit = tokens_to_chars(budget.conversation);
            let mut lines: Vec<String> = Vec::new();
            let mut used = "Recent conversation:".len();
            if let Some(summary) = &self.context_summary {
                let line = format!("summary: {summary}");
                used += line.len() + 1;
                lines.push(line);
            }
            // Newest messages win when the allocation runs out.
            let mut recent = Vec::new();
            for message in self.conversation_history.iter().rev() {
                let line = format!("{}: {}", message.role, message.content);
                if used + line.len() + 1 > limit {
                    break;
                }
                used += line.len() + 1;
                recent.push(line);
            }
            recent.reverse();
            lines.extend(recent);
            if !lines.is_empty() {
                let section = format!("Recent conversation:\n{}", lines.join("\n"));
                parts.push(truncate_chars(&section, limit));
            }
        }

        if budget.semantic_results > 0 && !self.semantic_chunks.is_empty() {
            let chunks: Vec<&str> = self.semantic_chunks.iter().map(|c| c.text.as_str()).collect();
            let section = format!("Relevant context:\n{}", chunks.join("\n---\n"));
            parts.push(truncate_chars(
                &section,
                tokens_to_chars(budget.semantic_results),
            ));
        }

        if budget.tool_results > 0 && !self.cached_tool_results.is_empty() {
            let lines: Vec<String> = self
                .cached_tool_results
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect();
            let section = format!("Cached tool results:\n{}", lines.join("\n"));
            parts.push(truncate_chars(&section, tokens_to_chars(budget.tool_results)));
        }

        truncate_chars(&parts.join("\n\n"), tokens_to_chars(budget.total))
    }

    /// Approximate token count of the rendered prompt block.
    pub fn estimated_tokens(&self) -> usize {
        self.to_prompt_context()
            .chars()
            .count()
            .div_ceil(CHARS_PER_TOKEN)
    }
}

fn tokens_to_chars(tokens: u32) -> usize {
    tokens as usize * CHARS_PER_TOKEN
}

/// Cut to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
