use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use finsight_models::cache_schema::SEMANTIC_DDL;
use finsight_models::config::SemanticConfig;
use finsight_models::context::truncate_chars;
use finsight_models::semantic::{ChunkPayload, SemanticHit, SemanticPoint, SparseVector};
use finsight_models::tier::BackendKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::db::{format_ts, Db};
use crate::embedding::Embedder;
use crate::error::StoreError;
use crate::fusion::{cosine_similarity, reciprocal_rank_fusion, ScoredChunk};
use crate::sparse::sparse_from_text;

/// Longest candidate text re-embedded during re-ranking.
const RERANK_MAX_CHARS: usize = 2000;

/// Payload conditions for semantic search.
///
/// Each non-empty field is one condition: symbol, kind and user are any-of
/// sets; the date bounds are inclusive ISO-8601 string comparisons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    pub symbols: Vec<String>,
    pub kinds: Vec<String>,
    pub users: Vec<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl SearchFilter {
    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(|s| s.into().to_uppercase()).collect();
        self
    }

    pub fn kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn date_from(mut self, date: impl Into<String>) -> Self {
        self.date_from = Some(date.into());
        self
    }

    pub fn date_to(mut self, date: impl Into<String>) -> Self {
        self.date_to = Some(date.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
            && self.kinds.is_empty()
            && self.users.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    /// Every condition holds. An empty filter matches everything.
    pub fn matches_all(&self, payload: &ChunkPayload) -> bool {
        self.conditions(payload).into_iter().all(|held| held)
    }

    /// At least one condition holds. An empty filter matches everything.
    pub fn matches_any(&self, payload: &ChunkPayload) -> bool {
        let conditions = self.conditions(payload);
        conditions.is_empty() || conditions.into_iter().any(|held| held)
    }

    fn conditions(&self, payload: &ChunkPayload) -> Vec<bool> {
        let mut held = Vec::with_capacity(4);
        if !self.symbols.is_empty() {
            held.push(
                payload
                    .symbol
                    .as_ref()
                    .is_some_and(|s| self.symbols.iter().any(|f| f.eq_ignore_ascii_case(s))),
            );
        }
        if !self.kinds.is_empty() {
            held.push(self.kinds.iter().any(|k| *k == payload.kind));
        }
        if !self.users.is_empty() {
            held.push(
                payload
                    .user_id
                    .as_ref()
                    .is_some_and(|u| self.users.contains(u)),
            );
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            held.push(payload.date.as_deref().is_some_and(|date| {
                self.date_from.as_deref().map_or(true, |from| date >= from)
                    && self.date_to.as_deref().map_or(true, |to| date <= to)
            }));
        }
        held
    }
}

/// How a filter restricts a single ranked search.
#[derive(Debug, Clone, Copy)]
pub enum Clause<'a> {
    Unfiltered,
    Must(&'a SearchFilter),
    Should(&'a SearchFilter),
}

impl Clause<'_> {
    fn admits(&self, payload: &ChunkPayload) -> bool {
        match self {
            Clause::Unfiltered => true,
            Clause::Must(filter) => filter.matches_all(payload),
            Clause::Should(filter) => filter.matches_any(payload),
        }
    }
}

/// Embedding-based nearest-neighbour index with hybrid dense/sparse search.
///
/// Points live in SQLite and are scanned per query, so search cost grows
/// linearly with the number of chunks.
#[derive(Clone)]
pub struct SemanticIndex {
    db: Db,
    embedder: Arc<dyn Embedder>,
    config: SemanticConfig,
}

impl SemanticIndex {
    /// Open the configured file, falling back to an in-memory database.
    pub fn connect(
        config: &SemanticConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            db: Db::connect("semantic_index", config.db_path.as_deref(), SEMANTIC_DDL)?,
            embedder,
            config: config.clone(),
        })
    }

    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        Ok(Self {
            db: Db::open_in_memory(SEMANTIC_DDL)?,
            embedder,
            config: SemanticConfig::default(),
        })
    }

    pub fn with_config(mut self, config: SemanticConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.db.backend()
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    /// Insert points. Ids already present are left unchanged.
    /// Returns the number of points actually written.
    pub async fn upsert(&self, points: Vec<SemanticPoint>) -> Result<usize, StoreError> {
        if points.is_empty() {
            return Ok(0);
        }
        let dimension = self.embedder.dimension();
        for point in &points {
            if point.dense.len() != dimension {
                return Err(StoreError::InvalidInput(format!(
                    "point {} has dimension {}, index expects {dimension}",
                    point.id,
                    point.dense.len()
                )));
            }
        }

        let written = self
            .db
            .run_blocking(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR IGNORE INTO semantic_chunks \
                         (id, dense, sparse_json, text, symbol, kind, source, date, \
                          user_id, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    )?;
                    let now = format_ts(Utc::now());
                    for point in &points {
                        written += stmt.execute(rusqlite::params![
                            point.id,
                            encode_dense(&point.dense),
                            serde_json::to_string(&point.sparse)?,
                            point.payload.text,
                            point.payload.symbol,
                            point.payload.kind,
                            point.payload.source,
                            point.payload.date,
                            point.payload.user_id,
                            now,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(written)
            })
            .await?;

        debug!(written, "Semantic points upserted");
        Ok(written)
    }

    /// Embed and index text snippets. Ids are content hashes, so the same
    /// snippet indexed twice is stored once. Returns the ids in input order.
    pub async fn upsert_snippets(
        &self,
        snippets: Vec<ChunkPayload>,
    ) -> Result<Vec<String>, StoreError> {
        let snippets: Vec<ChunkPayload> = snippets
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect();
        if snippets.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = snippets.iter().map(|s| s.text.clone()).collect();
        let dense = self.embedder.embed(&texts).await?;
        if dense.len() != snippets.len() {
            return Err(StoreError::Embedding(format!(
                "embedder returned {} vectors for {} snippets",
                dense.len(),
                snippets.len()
            )));
        }

        let points: Vec<SemanticPoint> = snippets
            .into_iter()
            .zip(dense)
            .map(|(payload, dense)| SemanticPoint {
                id: content_id(&payload),
                sparse: sparse_from_text(&payload.text),
                dense,
                payload,
            })
            .collect();
        let ids = points.iter().map(|p| p.id.clone()).collect();
        self.upsert(points).await?;
        Ok(ids)
    }

    /// Cosine ranking against stored dense vectors.
    pub async fn search_dense(
        &self,
        vector: Vec<f32>,
        clause: Clause<'_>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let points = self.load_points().await?;
        Ok(rank_dense(&points, &vector, clause, limit))
    }

    /// Sparse dot-product ranking. Points with no shared terms are excluded.
    pub async fn search_sparse(
        &self,
        vector: SparseVector,
        clause: Clause<'_>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let points = self.load_points().await?;
        Ok(rank_sparse(&points, &vector, clause, limit))
    }

    /// Dense and sparse search fused with RRF.
    ///
    /// With a `should` filter the must-pair and should-pair are fused
    /// separately and then fused again, biasing toward should-matches
    /// without excluding the rest.
    pub async fn hybrid_search(
        &self,
        dense: Vec<f32>,
        sparse: SparseVector,
        must: Option<&SearchFilter>,
        should: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let points = self.load_points().await?;
        let k = self.config.rrf_k;

        let must_clause = match must {
            Some(filter) if !filter.is_empty() => Clause::Must(filter),
            _ => Clause::Unfiltered,
        };
        let fused_must = reciprocal_rank_fusion(
            &[
                rank_dense(&points, &dense, must_clause, limit),
                rank_sparse(&points, &sparse, must_clause, limit),
            ],
            k,
        );

        let should = match should {
            Some(filter) if !filter.is_empty() => filter,
            _ => return Ok(fused_must.into_iter().take(limit).collect()),
        };

        let should_clause = Clause::Should(should);
        let fused_should = reciprocal_rank_fusion(
            &[
                rank_dense(&points, &dense, should_clause, limit),
                rank_sparse(&points, &sparse, should_clause, limit),
            ],
            k,
        );

        Ok(reciprocal_rank_fusion(&[fused_must, fused_should], k)
            .into_iter()
            .take(limit)
            .collect())
    }

    /// Query-text retrieval: hybrid search over a candidate window, then an
    /// optional cosine re-rank against freshly embedded candidate texts.
    pub async fn retrieve(
        &self,
        query: &str,
        must: Option<&SearchFilter>,
        should: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Embedding("no vector for query".to_string()))?;
        let window = self.config.candidate_limit.max(limit);
        let mut candidates = self
            .hybrid_search(query_vector.clone(), sparse_from_text(query), must, should, window)
            .await?;

        if self.config.rerank && candidates.len() > 1 {
            let texts: Vec<String> = candidates
                .iter()
                .map(|c| truncate_chars(&c.payload.text, RERANK_MAX_CHARS))
                .collect();
            let vectors = self.embedder.embed(&texts).await?;
            for (candidate, vector) in candidates.iter_mut().zip(vectors.iter()) {
                candidate.score = cosine_similarity(&query_vector, vector);
            }
            candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        }

        debug!(candidates = candidates.len(), limit, "Semantic retrieve");
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|c| SemanticHit {
                id: c.id,
                text: c.payload.text,
                symbol: c.payload.symbol,
                kind: c.payload.kind,
                score: c.score,
            })
            .collect())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.db
            .run_blocking(|conn| {
                let count: usize =
                    conn.query_row("SELECT COUNT(*) FROM semantic_chunks", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }

    async fn load_points(&self) -> Result<Vec<SemanticPoint>, StoreError> {
        self.db
            .run_blocking(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, dense, sparse_json, text, symbol, kind, source, date, user_id \
                     FROM semantic_chunks ORDER BY created_at, id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, String>(2)?,
                            ChunkPayload {
                                text: row.get(3)?,
                                symbol: row.get(4)?,
                                kind: row.get(5)?,
                                source: row.get(6)?,
                                date: row.get(7)?,
                                user_id: row.get(8)?,
                            },
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut points = Vec::with_capacity(rows.len());
                for (id, dense, sparse_json, payload) in rows {
                    points.push(SemanticPoint {
                        dense: decode_dense(&id, &dense)?,
                        sparse: serde_json::from_str(&sparse_json)?,
                        id,
                        payload,
                    });
                }
                Ok(points)
            })
            .await
    }
}

fn rank_dense(
    points: &[SemanticPoint],
    vector: &[f32],
    clause: Clause<'_>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let scored = points
        .iter()
        .filter(|p| clause.admits(&p.payload))
        .map(|p| scored(p, cosine_similarity(vector, &p.dense)))
        .collect();
    top(scored, limit)
}

fn rank_sparse(
    points: &[SemanticPoint],
    vector: &SparseVector,
    clause: Clause<'_>,
    limit: usize,
) -> Vec<ScoredChunk> {
    if vector.is_empty() {
        return Vec::new();
    }
    let scored = points
        .iter()
        .filter(|p| clause.admits(&p.payload))
        .filter_map(|p| {
            let score = vector.dot(&p.sparse) as f64;
            (score > 0.0).then(|| scored(p, score))
        })
        .collect();
    top(scored, limit)
}

fn scored(point: &SemanticPoint, score: f64) -> ScoredChunk {
    ScoredChunk {
        id: point.id.clone(),
        score,
        payload: point.payload.clone(),
    }
}

fn top(mut scored: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

fn content_id(payload: &ChunkPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.kind.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.symbol.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.user_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.text.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

fn encode_dense(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_dense(id: &str, bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::CorruptRow {
            table: "semantic_chunks",
            reason: format!("dense vector for {id} has {} bytes", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
