mod db;
pub mod durable;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod http_embedder;
pub mod semantic;
pub mod sparse;

pub use durable::{DecisionOutcome, DurableStore};
pub use embedding::{CachedEmbedder, Embedder, HashingEmbedder};
pub use error::StoreError;
pub use fusion::{cosine_similarity, reciprocal_rank_fusion, ScoredChunk};
pub use http_embedder::HttpEmbedder;
pub use semantic::{Clause, SearchFilter, SemanticIndex};
pub use sparse::sparse_from_text;
