use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version written with every payload persisted to the durable store.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Hold => "hold",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            "hold" => Ok(TradeAction::Hold),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

/// The final recommendation of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub action: TradeAction,
    pub confidence: Option<Decimal>,
    #[serde(default)]
    pub rationale: String,
    pub target_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystReport {
    pub analyst: String,
    pub summary: String,
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub risk_level: String,
    #[serde(default)]
    pub summary: String,
    pub max_position_pct: Option<Decimal>,
}

/// Known payload shapes stored in the decision log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionPayload {
    Decision(DecisionRecord),
    AnalystReport(AnalystReport),
    RiskAssessment(RiskAssessment),
}

/// A payload tagged with the schema version it was written under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedPayload {
    pub schema_version: u32,
    #[serde(flatten)]
    pub payload: DecisionPayload,
}

impl VersionedPayload {
    pub fn new(payload: DecisionPayload) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            payload,
        }
    }
}

impl From<DecisionRecord> for VersionedPayload {
    fn from(record: DecisionRecord) -> Self {
        Self::new(DecisionPayload::Decision(record))
    }
}

impl From<AnalystReport> for VersionedPayload {
    fn from(report: AnalystReport) -> Self {
        Self::new(DecisionPayload::AnalystReport(report))
    }
}

impl From<RiskAssessment> for VersionedPayload {
    fn from(assessment: RiskAssessment) -> Self {
        Self::new(DecisionPayload::RiskAssessment(assessment))
    }
}

/// Input for recording one decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDecision {
    pub user_id: String,
    pub session_id: Option<String>,
    pub ticker: String,
    pub query: String,
    pub decision: DecisionRecord,
    #[serde(default)]
    pub analyst_reports: Vec<AnalystReport>,
    pub risk_assessment: Option<RiskAssessment>,
    pub sentiment: Option<f64>,
}

/// One row of the append-only decision log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<String>,
    pub ticker: String,
    pub query: String,
    pub decision: VersionedPayload,
    pub analyst_reports: Vec<VersionedPayload>,
    pub risk_assessment: Option<VersionedPayload>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn versioned_payload_shape() {
        let record = DecisionRecord {
            action: TradeAction::Buy,
            confidence: Some(dec!(0.78)),
            rationale: "Momentum and earnings beat".to_string(),
            target_price: Some(dec!(210.50)),
        };
        let json = serde_json::to_value(VersionedPayload::from(record.clone())).unwrap();
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["kind"], "decision");
        assert_eq!(json["action"], "buy");
        assert_eq!(json["target_price"], "210.50");

        let parsed: VersionedPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.payload, DecisionPayload::Decision(record));
    }

    #[test]
    fn risk_assessment_tag() {
        let payload = VersionedPayload::from(RiskAssessment {
            risk_level: "medium".to_string(),
            summary: String::new(),
            max_position_pct: Some(dec!(5)),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"risk_assessment\""));
    }

    #[test]
    fn trade_action_from_str() {
        assert_eq!(" SELL ".parse::<TradeAction>().unwrap(), TradeAction::Sell);
        assert!("short".parse::<TradeAction>().is_err());
    }
}
