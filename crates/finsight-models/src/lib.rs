pub mod budget;
pub mod cache_schema;
pub mod config;
pub mod context;
pub mod intent;
pub mod payload;
pub mod profile;
pub mod semantic;
pub mod session;
pub mod tier;

pub use budget::{budget_for, TokenBudget};
pub use config::{
    ClassifierConfig, ConfigError, DurableConfig, EmbedderKind, FinsightConfig, MemoryConfig,
    RunCacheConfig, SemanticConfig, SessionConfig,
};
pub use context::{ConversationMessage, Context};
pub use intent::{ClassificationResult, ClassificationStage, QueryIntent};
pub use payload::{
    AnalystReport, DecisionLogEntry, DecisionPayload, DecisionRecord, NewDecision,
    RiskAssessment, TradeAction, VersionedPayload,
};
pub use profile::{
    ProfileUpdate, RecentDecision, RiskTolerance, TickerDecisionSummary, TradingStyle,
    UserPreferences, UserProfileSummary,
};
pub use semantic::{ChunkPayload, Document, SemanticHit, SemanticPoint, SparseVector};
pub use session::{ConversationLogEntry, Role, SessionTurn, UserSnapshot};
pub use tier::{BackendKind, TierId, TierReport, TierStatus};
