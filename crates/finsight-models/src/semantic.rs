use serde::{Deserialize, Serialize};

/// Sparse lexical vector: parallel `indices` and `values`, indices ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product over shared indices. Both sides must be sorted by index.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Payload stored alongside each indexed chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    pub text: String,
    pub symbol: Option<String>,
    pub kind: String,
    pub source: Option<String>,
    /// ISO-8601 date, compared lexically by range filters.
    pub date: Option<String>,
    pub user_id: Option<String>,
}

/// One point in the semantic index. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: ChunkPayload,
}

/// A search result as surfaced in a `Context`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticHit {
    pub id: String,
    pub text: String,
    pub symbol: Option<String>,
    pub kind: String,
    pub score: f64,
}

/// A raw document handed to the ingestion path before chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub text: String,
    pub symbol: Option<String>,
    #[serde(default = "default_document_kind")]
    pub kind: String,
    pub source: Option<String>,
    pub date: Option<String>,
    pub user_id: Option<String>,
}

fn default_document_kind() -> String {
    "document".to_string()
}
