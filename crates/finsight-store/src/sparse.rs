//! Lexical features shared by the sparse vectoriser and the hashing embedder.

use std::collections::BTreeMap;

use finsight_models::semantic::SparseVector;
use sha2::{Digest, Sha256};

/// Sparse index space size.
pub const SPARSE_DIMENSION: u64 = 1 << 20;

/// Lower-cased alphanumeric words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Stable 64-bit feature hash.
pub fn feature_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Log-scaled term frequencies, hashed into [`SPARSE_DIMENSION`] and L2-normalised.
pub fn sparse_from_text(text: &str) -> SparseVector {
    let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
    for token in tokenize(text) {
        let index = (feature_hash(&token) % SPARSE_DIMENSION) as u32;
        *counts.entry(index).or_insert(0.0) += 1.0;
    }

    let weights: Vec<(u32, f32)> = counts
        .into_iter()
        .map(|(index, tf)| (index, 1.0 + tf.ln()))
        .collect();
    let norm = weights.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm == 0.0 {
        return SparseVector::default();
    }

    SparseVector {
        indices: weights.iter().map(|(i, _)| *i).collect(),
        values: weights.iter().map(|(_, w)| w / norm).collect(),
    }
}
