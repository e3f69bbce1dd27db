use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::payload::TradeAction;

/// Maximum number of entries kept in `TickerDecisionSummary::recent_decisions`.
pub const RECENT_DECISIONS_CAP: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTolerance::Conservative => "conservative",
            RiskTolerance::Moderate => "moderate",
            RiskTolerance::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTolerance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" | "low" => Ok(RiskTolerance::Conservative),
            "moderate" | "medium" => Ok(RiskTolerance::Moderate),
            "aggressive" | "high" => Ok(RiskTolerance::Aggressive),
            other => Err(format!("unknown risk tolerance: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradingStyle {
    Day,
    Swing,
    #[serde(alias = "long-term")]
    LongTerm,
}

impl TradingStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingStyle::Day => "day",
            TradingStyle::Swing => "swing",
            TradingStyle::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for TradingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "day_trading" => Ok(TradingStyle::Day),
            "swing" => Ok(TradingStyle::Swing),
            "long_term" | "long-term" | "longterm" => Ok(TradingStyle::LongTerm),
            other => Err(format!("unknown trading style: {other}")),
        }
    }
}

/// One row per user, maintained at write time.
///
/// `version` increments on every write and is the invalidation token for the
/// session-cached user snapshot. Unknown users report version 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfileSummary {
    pub user_id: String,
    pub risk_tolerance: Option<RiskTolerance>,
    #[serde(default)]
    pub preferred_sectors: Vec<String>,
    pub avg_position_size: Option<Decimal>,
    pub trading_style: Option<TradingStyle>,
    pub total_decisions: u64,
    pub last_active: Option<DateTime<Utc>>,
    pub version: u64,
}

impl UserProfileSummary {
    pub fn preferences(&self) -> UserPreferences {
        UserPreferences {
            risk_tolerance: self.risk_tolerance,
            preferred_sectors: self.preferred_sectors.clone(),
            trading_style: self.trading_style,
        }
    }
}

/// The preference subset of a profile, as surfaced to prompt construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPreferences {
    pub risk_tolerance: Option<RiskTolerance>,
    #[serde(default)]
    pub preferred_sectors: Vec<String>,
    pub trading_style: Option<TradingStyle>,
}

impl UserPreferences {
    pub fn is_empty(&self) -> bool {
        self.risk_tolerance.is_none()
            && self.preferred_sectors.is_empty()
            && self.trading_style.is_none()
    }
}

/// Partial profile update. `None` fields keep the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdate {
    pub risk_tolerance: Option<RiskTolerance>,
    pub preferred_sectors: Option<Vec<String>>,
    pub avg_position_size: Option<Decimal>,
    pub trading_style: Option<TradingStyle>,
    #[serde(default)]
    pub increment_decisions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentDecision {
    pub decision: TradeAction,
    pub date: DateTime<Utc>,
    pub sentiment: Option<f64>,
}

/// One row per (user, ticker), updated alongside every recorded decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerDecisionSummary {
    pub user_id: String,
    pub ticker: String,
    pub total_analyses: u64,
    pub last_decision: Option<TradeAction>,
    pub last_analysis_date: Option<DateTime<Utc>>,
    /// Newest last, at most [`RECENT_DECISIONS_CAP`] entries.
    #[serde(default)]
    pub recent_decisions: Vec<RecentDecision>,
    pub avg_sentiment: Option<f64>,
    pub notes: Option<String>,
}

impl TickerDecisionSummary {
    pub fn empty(user_id: &str, ticker: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ticker: ticker.to_string(),
            total_analyses: 0,
            last_decision: None,
            last_analysis_date: None,
            recent_decisions: Vec::new(),
            avg_sentiment: None,
            notes: None,
        }
    }

    /// Fold one new decision into the summary.
    ///
    /// The average covers the sentiments still present in the bounded history.
    pub fn record(&mut self, decision: TradeAction, at: DateTime<Utc>, sentiment: Option<f64>) {
        self.recent_decisions.push(RecentDecision {
            decision,
            date: at,
            sentiment,
        });
        if self.recent_decisions.len() > RECENT_DECISIONS_CAP {
            let excess = self.recent_decisions.len() - RECENT_DECISIONS_CAP;
            self.recent_decisions.drain(..excess);
        }

        let sentiments: Vec<f64> = self
            .recent_decisions
            .iter()
            .filter_map(|d| d.sentiment)
            .collect();
        self.avg_sentiment = if sentiments.is_empty() {
            None
        } else {
            Some(sentiments.iter().sum::<f64>() / sentiments.len() as f64)
        };

        self.total_analyses += 1;
        self.last_decision = Some(decision);
        self.last_analysis_date = Some(at);
    }
}
