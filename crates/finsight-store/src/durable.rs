use std::str::FromStr;

use chrono::{DateTime, Utc};
use finsight_models::cache_schema::DURABLE_DDL;
use finsight_models::config::DurableConfig;
use finsight_models::payload::{DecisionLogEntry, NewDecision, TradeAction, VersionedPayload};
use finsight_models::profile::{
    ProfileUpdate, RecentDecision, RiskTolerance, TickerDecisionSummary, TradingStyle,
    UserProfileSummary,
};
use finsight_models::session::{ConversationLogEntry, Role};
use finsight_models::tier::BackendKind;
use rust_decimal::Decimal;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{format_ts, parse_ts, Db};
use crate::error::StoreError;

/// Result of [`DurableStore::save_decision_with_summaries`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub id: Uuid,
    /// Profile version after the write, when the profile update succeeded.
    pub version: Option<u64>,
    /// False when either summary update failed after the raw row was written.
    pub summaries_current: bool,
}

/// Permanent user store: decision and conversation logs plus two summary
/// tables that are maintained at write time.
#[derive(Clone)]
pub struct DurableStore {
    db: Db,
}

impl DurableStore {
    /// Open the configured database file, falling back to an in-memory
    /// database if it is unset or cannot be opened.
    pub fn connect(config: &DurableConfig) -> Result<Self, StoreError> {
        Ok(Self {
            db: Db::connect("durable_store", config.db_path.as_deref(), DURABLE_DDL)?,
        })
    }

    pub fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self {
            db: Db::open(path, DURABLE_DDL)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Db::open_in_memory(DURABLE_DDL)?,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.db.backend()
    }

    // -- decision log --------------------------------------------------

    /// Append one raw decision row. Does not touch the summaries.
    pub async fn record_decision(
        &self,
        decision: &NewDecision,
    ) -> Result<DecisionLogEntry, StoreError> {
        require("user_id", &decision.user_id)?;
        require("ticker", &decision.ticker)?;

        let entry = DecisionLogEntry {
            id: Uuid::new_v4(),
            user_id: decision.user_id.clone(),
            session_id: decision.session_id.clone(),
            ticker: decision.ticker.trim().to_uppercase(),
            query: decision.query.clone(),
            decision: VersionedPayload::from(decision.decision.clone()),
            analyst_reports: decision
                .analyst_reports
                .iter()
                .cloned()
                .map(VersionedPayload::from)
                .collect(),
            risk_assessment: decision.risk_assessment.clone().map(VersionedPayload::from),
            created_at: Utc::now(),
        };

        let decision_json = serde_json::to_string(&entry.decision)?;
        let reports_json = serde_json::to_string(&entry.analyst_reports)?;
        let risk_json = entry
            .risk_assessment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = entry.clone();
        self.db
            .run_blocking(move |conn| {
                conn.execute(
                    "INSERT INTO decision_log \
                     (id, user_id, session_id, ticker, query, decision_json, reports_json, \
                      risk_json, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        row.id.to_string(),
                        row.user_id,
                        row.session_id,
                        row.ticker,
                        row.query,
                        decision_json,
                        reports_json,
                        risk_json,
                        format_ts(row.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(
            user_id = %entry.user_id,
            ticker = %entry.ticker,
            id = %entry.id,
            "Decision recorded"
        );
        Ok(entry)
    }

    /// Append the raw decision, then refresh the ticker and profile summaries.
    ///
    /// A failed raw write aborts before any summary is touched. A failed
    /// summary update is logged and reported through `summaries_current`;
    /// the raw row stays.
    pub async fn save_decision_with_summaries(
        &self,
        decision: &NewDecision,
    ) -> Result<DecisionOutcome, StoreError> {
        let entry = self.record_decision(decision).await?;
        let mut summaries_current = true;

        if let Err(e) = self
            .apply_ticker_decision(
                &entry.user_id,
                &entry.ticker,
                decision.decision.action,
                decision.sentiment,
                None,
                entry.created_at,
            )
            .await
        {
            warn!(
                user_id = %entry.user_id,
                ticker = %entry.ticker,
                error = %e,
                "Ticker summary update failed"
            );
            summaries_current = false;
        }

        let update = ProfileUpdate {
            increment_decisions: true,
            ..ProfileUpdate::default()
        };
        let version = match self.update_user_summary(&entry.user_id, &update).await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(user_id = %entry.user_id, error = %e, "Profile summary update failed");
                summaries_current = false;
                None
            }
        };

        info!(
            user_id = %entry.user_id,
            ticker = %entry.ticker,
            action = %decision.decision.action,
            version = ?version,
            summaries_current,
            "Decision saved"
        );
        Ok(DecisionOutcome {
            id: entry.id,
            version,
            summaries_current,
        })
    }

    /// Newest decisions first, optionally for one ticker.
    pub async fn get_recent_decisions(
        &self,
        user_id: &str,
        limit: usize,
        ticker: Option<&str>,
    ) -> Result<Vec<DecisionLogEntry>, StoreError> {
        let user_id = user_id.to_string();
        let ticker = ticker.map(|t| t.trim().to_uppercase());
        let limit = limit as i64;
        self.db
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, session_id, ticker, query, decision_json, reports_json, \
                            risk_json, created_at \
                     FROM decision_log \
                     WHERE user_id = ?1 AND (?2 IS NULL OR ticker = ?2) \
                     ORDER BY created_at DESC, rowid DESC \
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, ticker, limit], RawDecision::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RawDecision::into_entry).collect()
            })
            .await
    }

    // -- profile summary -----------------------------------------------

    pub async fn get_user_summary(
        &self,
        user_id: &str,
    ) -> Result<Option<UserProfileSummary>, StoreError> {
        let user_id = user_id.to_string();
        self.db
            .run_blocking(move |conn| read_profile(conn, &user_id))
            .await
    }

    /// Current profile version, 0 for users without a profile row.
    pub async fn get_user_version(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        self.db
            .run_blocking(move |conn| {
                let mut stmt =
                    conn.prepare_cached(
                        "SELECT version FROM user_profile_summary WHERE user_id = ?1",
                    )?;
                let version: Option<i64> = stmt
                    .query_row(rusqlite::params![user_id], |row| row.get(0))
                    .optional()?;
                Ok(version.map(|v| v.max(0) as u64).unwrap_or(0))
            })
            .await
    }

    /// Merge `update` into the profile row and bump its version.
    ///
    /// Unset fields keep their stored value. New rows start at version 1.
    /// Returns the version after the write.
    pub async fn update_user_summary(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<u64, StoreError> {
        require("user_id", user_id)?;
        let user_id = user_id.to_string();
        let risk = update.risk_tolerance.map(|r| r.as_str().to_string());
        let sectors = update
            .preferred_sectors
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let position = update.avg_position_size.map(|d| d.to_string());
        let style = update.trading_style.map(|s| s.as_str().to_string());
        let increment: i64 = if update.increment_decisions { 1 } else { 0 };
        let now = format_ts(Utc::now());

        let version = self
            .db
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO user_profile_summary \
                     (user_id, risk_tolerance, preferred_sectors, avg_position_size, \
                      trading_style, \
                      total_decisions, last_active, version, updated_at) \
                     VALUES (?1, ?2, COALESCE(?3, '[]'), ?4, ?5, ?6, ?7, 1, ?7) \
                     ON CONFLICT(user_id) DO UPDATE SET \
                         risk_tolerance = COALESCE(?2, user_profile_summary.risk_tolerance), \
                         preferred_sectors = COALESCE(?3, user_profile_summary.preferred_sectors), \
                         avg_position_size = COALESCE(?4, user_profile_summary.avg_position_size), \
                         trading_style = COALESCE(?5, user_profile_summary.trading_style), \
                         total_decisions = user_profile_summary.total_decisions + ?6, \
                         last_active = ?7, \
                         version = user_profile_summary.version + 1, \
                         updated_at = ?7 \
                     RETURNING version",
                )?;
                let version: i64 = stmt.query_row(
                    rusqlite::params![user_id, risk, sectors, position, style, increment, now],
                    |row| row.get(0),
                )?;
                Ok(version.max(0) as u64)
            })
            .await?;

        debug!(version, "Profile summary updated");
        Ok(version)
    }

    // -- ticker summary ------------------------------------------------

    pub async fn get_ticker_summary(
        &self,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<TickerDecisionSummary>, StoreError> {
        let user_id = user_id.to_string();
        let ticker = ticker.trim().to_uppercase();
        self.db
            .run_blocking(move |conn| read_ticker(conn, &user_id, &ticker))
            .await
    }

    /// Ticker summaries for a user, most recently analysed first.
    pub async fn get_user_tickers(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TickerDecisionSummary>, StoreError> {
        let user_id = user_id.to_string();
        let limit = limit as i64;
        self.db
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TICKER_COLUMNS} FROM user_ticker_summary \
                     WHERE user_id = ?1 \
                     ORDER BY last_analysis_date DESC, updated_at DESC \
                     LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, limit], RawTicker::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RawTicker::into_summary).collect()
            })
            .await
    }

    /// Fold one decision into the (user, ticker) summary row.
    pub async fn update_ticker_summary(
        &self,
        user_id: &str,
        ticker: &str,
        action: TradeAction,
        sentiment: Option<f64>,
        notes: Option<String>,
    ) -> Result<TickerDecisionSummary, StoreError> {
        self.apply_ticker_decision(user_id, ticker, action, sentiment, notes, Utc::now())
            .await
    }

    async fn apply_ticker_decision(
        &self,
        user_id: &str,
        ticker: &str,
        action: TradeAction,
        sentiment: Option<f64>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<TickerDecisionSummary, StoreError> {
        require("user_id", user_id)?;
        require("ticker", ticker)?;
        let user_id = user_id.to_string();
        let ticker = ticker.trim().to_uppercase();

        self.db
            .run_blocking(move |conn| {
                // IMMEDIATE takes the write lock before the read so concurrent
                // writers for the same row serialize.
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let mut summary = read_ticker(&tx, &user_id, &ticker)?
                    .unwrap_or_else(|| TickerDecisionSummary::empty(&user_id, &ticker));
                summary.record(action, at, sentiment);
                if notes.is_some() {
                    summary.notes = notes;
                }
                write_ticker(&tx, &summary)?;
                tx.commit()?;
                Ok(summary)
            })
            .await
    }

    // -- conversation log ----------------------------------------------

    /// Append one turn to the permanent conversation log. Returns its row id.
    pub async fn save_message(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        role: Role,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<i64, StoreError> {
        require("user_id", user_id)?;
        let user_id = user_id.to_string();
        let session_id = session_id.map(str::to_string);
        let content = content.to_string();
        let metadata_json = serde_json::to_string(&metadata)?;
        let now = format_ts(Utc::now());

        self.db
            .run_blocking(move |conn| {
                conn.execute(
                    "INSERT INTO conversation_log \
                     (user_id, session_id, role, content, metadata_json, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        user_id,
                        session_id,
                        role.as_str(),
                        content,
                        metadata_json,
                        now
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// The newest `limit` logged turns, returned oldest first.
    pub async fn get_conversation_history(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ConversationLogEntry>, StoreError> {
        let user_id = user_id.to_string();
        let session_id = session_id.map(str::to_string);
        let limit = limit as i64;
        self.db
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, session_id, role, content, metadata_json, created_at \
                     FROM conversation_log \
                     WHERE user_id = ?1 AND (?2 IS NULL OR session_id = ?2) \
                     ORDER BY id DESC \
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, session_id, limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut entries = Vec::with_capacity(rows.len());
                for row in rows.into_iter().rev() {
                    let (id, user_id, session_id, role, content, metadata_json, created_at) = row;
                    entries.push(ConversationLogEntry {
                        id,
                        user_id,
                        session_id,
                        role: Role::from_str(&role)
                            .map_err(|reason| corrupt("conversation_log", reason))?,
                        content,
                        metadata: serde_json::from_str(&metadata_json)?,
                        created_at: parse_ts("conversation_log", &created_at)?,
                    });
                }
                Ok(entries)
            })
            .await
    }
}

fn require(name: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::InvalidInput(format!("{name} must not be empty")));
    }
    Ok(())
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn parse_opt<T: FromStr<Err = String>>(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, StoreError> {
    raw.map(|s| T::from_str(&s).map_err(|reason| corrupt(table, reason)))
        .transpose()
}

fn read_profile(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<UserProfileSummary>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, risk_tolerance, preferred_sectors, avg_position_size, trading_style, \
                total_decisions, last_active, version \
         FROM user_profile_summary WHERE user_id = ?1",
    )?;
    let raw = stmt
        .query_row(rusqlite::params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })
        .optional()?;

    let Some((user_id, risk, sectors, position, style, total, last_active, version)) = raw else {
        return Ok(None);
    };

    const TABLE: &str = "user_profile_summary";
    Ok(Some(UserProfileSummary {
        user_id,
        risk_tolerance: parse_opt::<RiskTolerance>(TABLE, risk)?,
        preferred_sectors: serde_json::from_str(&sectors)?,
        avg_position_size: position
            .map(|p| Decimal::from_str(&p).map_err(|e| corrupt(TABLE, e.to_string())))
            .transpose()?,
        trading_style: parse_opt::<TradingStyle>(TABLE, style)?,
        total_decisions: total.max(0) as u64,
        last_active: last_active.map(|t| parse_ts(TABLE, &t)).transpose()?,
        version: version.max(0) as u64,
    }))
}

const TICKER_COLUMNS: &str = "user_id, ticker, total_analyses, last_decision, last_analysis_date, \
                              decisions_history, avg_sentiment, notes";

struct RawTicker {
    user_id: String,
    ticker: String,
    total_analyses: i64,
    last_decision: Option<String>,
    last_analysis_date: Option<String>,
    history: String,
    avg_sentiment: Option<f64>,
    notes: Option<String>,
}

impl RawTicker {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            ticker: row.get(1)?,
            total_analyses: row.get(2)?,
            last_decision: row.get(3)?,
            last_analysis_date: row.get(4)?,
            history: row.get(5)?,
            avg_sentiment: row.get(6)?,
            notes: row.get(7)?,
        })
    }

    fn into_summary(self) -> Result<TickerDecisionSummary, StoreError> {
        const TABLE: &str = "user_ticker_summary";
        let recent_decisions: Vec<RecentDecision> = serde_json::from_str(&self.history)?;
        Ok(TickerDecisionSummary {
            user_id: self.user_id,
            ticker: self.ticker,
            total_analyses: self.total_analyses.max(0) as u64,
            last_decision: parse_opt::<TradeAction>(TABLE, self.last_decision)?,
            last_analysis_date: self
                .last_analysis_date
                .map(|t| parse_ts(TABLE, &t))
                .transpose()?,
            recent_decisions,
            avg_sentiment: self.avg_sentiment,
            notes: self.notes,
        })
    }
}

fn read_ticker(
    conn: &Connection,
    user_id: &str,
    ticker: &str,
) -> Result<Option<TickerDecisionSummary>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TICKER_COLUMNS} FROM user_ticker_summary WHERE user_id = ?1 AND ticker = ?2"
    ))?;
    stmt.query_row(rusqlite::params![user_id, ticker], RawTicker::from_row)
        .optional()?
        .map(RawTicker::into_summary)
        .transpose()
}

fn write_ticker(conn: &Connection, summary: &TickerDecisionSummary) -> Result<(), StoreError> {
    let history = serde_json::to_string(&summary.recent_decisions)?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO user_ticker_summary \
         (user_id, ticker, total_analyses, last_decision, last_analysis_date, decisions_history, \
          avg_sentiment, notes, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(user_id, ticker) DO UPDATE SET \
             total_analyses = excluded.total_analyses, \
             last_decision = excluded.last_decision, \
             last_analysis_date = excluded.last_analysis_date, \
             decisions_history = excluded.decisions_history, \
             avg_sentiment = excluded.avg_sentiment, \
             notes = excluded.notes, \
             updated_at = excluded.updated_at",
    )?;
    stmt.execute(rusqlite::params![
        summary.user_id,
        summary.ticker,
        summary.total_analyses as i64,
        summary.last_decision.map(|d| d.as_str()),
        summary.last_analysis_date.map(format_ts),
        history,
        summary.avg_sentiment,
        summary.notes,
        format_ts(Utc::now()),
    ])?;
    Ok(())
}

struct RawDecision {
    id: String,
    user_id: String,
    session_id: Option<String>,
    ticker: String,
    query: String,
    decision_json: String,
    reports_json: String,
    risk_json: Option<String>,
    created_at: String,
}

impl RawDecision {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            session_id: row.get(2)?,
            ticker: row.get(3)?,
            query: row.get(4)?,
            decision_json: row.get(5)?,
            reports_json: row.get(6)?,
            risk_json: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_entry(self) -> Result<DecisionLogEntry, StoreError> {
        const TABLE: &str = "decision_log";
        Ok(DecisionLogEntry {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt(TABLE, e.to_string()))?,
            user_id: self.user_id,
            session_id: self.session_id,
            ticker: self.ticker,
            query: self.query,
            decision: serde_json::from_str(&self.decision_json)?,
            analyst_reports: serde_json::from_str(&self.reports_json)?,
            risk_assessment: self
                .risk_json
                .map(|json| serde_json::from_str(&json))
                .transpose()?,
            created_at: parse_ts(TABLE, &self.created_at)?,
        })
    }
}
