pub mod aggregator;
pub mod chunker;
pub mod claude_cli;
pub mod classifier;
pub mod completion;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod prompts;
pub mod tiers;

pub mod test_support;

pub use aggregator::{ContextAggregator, ContextRequest};
pub use chunker::chunk_text;
pub use claude_cli::ClaudeCliCompleter;
pub use classifier::{extract_tickers, Classifier};
pub use completion::{CompletionRequest, Completer};
pub use error::MemoryError;
pub use ingest::Ingestor;
pub use tiers::{ProfileTier, SemanticTier, TierFetch};
