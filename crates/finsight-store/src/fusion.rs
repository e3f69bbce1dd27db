//! Rank fusion and vector similarity.

use std::collections::HashMap;

use finsight_models::semantic::ChunkPayload;

/// A search result with its engine-specific score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f64,
    pub payload: ChunkPayload,
}

/// Reciprocal Rank Fusion over any number of ranked lists.
///
/// Each item scores `sum(1 / (k + rank))` over the lists it appears in, with
/// 1-based ranks. Output is sorted by fused score; ties keep first-seen order.
pub fn reciprocal_rank_fusion(lists: &[Vec<ScoredChunk>], k: f64) -> Vec<ScoredChunk> {
    let mut order: Vec<ScoredChunk> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for list in lists {
        for (rank, item) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match index.get(&item.id) {
                Some(&pos) => order[pos].score += contribution,
                None => {
                    index.insert(item.id.clone(), order.len());
                    let mut fused = item.clone();
                    fused.score = contribution;
                    order.push(fused);
                }
            }
        }
    }

    // sort_by is stable, which preserves first-seen order on ties
    order.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    order
}

/// Cosine similarity in [-1, 1]. Zero for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            id: id.to_string(),
            score,
            payload: ChunkPayload {
                text: format!("text {id}"),
                symbol: None,
                kind: "news".to_string(),
                source: None,
                date: None,
                user_id: None,
            },
        }
    }

    fn ids(list: &[ScoredChunk]) -> Vec<&str> {
        list.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn rrf_rewards_agreement() {
        let dense = vec![chunk("a", 0.9), chunk("b", 0.8), chunk("c", 0.7)];
        let sparse = vec![chunk("c", 5.0), chunk("b", 4.0), chunk("d", 1.0)];
        let fused = reciprocal_rank_fusion(&[dense, sparse], 60.0);

        assert_eq!(ids(&fused), vec!["b", "c", "a", "d"]);
        let expected_b = 1.0 / 62.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected_b).abs() < 1e-12);
    }

    #[test]
    fn rrf_ties_keep_first_seen() {
        let first = vec![chunk("x", 1.0)];
        let second = vec![chunk("y", 1.0)];
        let fused = reciprocal_rank_fusion(&[first, second], 60.0);
        assert_eq!(ids(&fused), vec!["x", "y"]);
    }

    #[test]
    fn rrf_deduplicates() {
        let list = vec![chunk("a", 1.0), chunk("b", 0.5)];
        let fused = reciprocal_rank_fusion(&[list.clone(), list], 60.0);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn rrf_empty_lists() {
        assert!(reciprocal_rank_fusion(&[vec![], vec![]], 60.0).is_empty());
    }

    #[test]
    fn cosine_known_values() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
