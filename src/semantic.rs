//! Embedding-based nearest-neighbour index.
//!
//! Every document is embedded once at build time. Vectors are cached in
//! SQLite keyed by `(corpus fingerprint, model)`, so a restart over an
//! unchanged knowledge base loads them instead of calling the backend.
//! Queries embed the question (one attempt, no retry) and rank documents
//! by cosine similarity.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::{RagError, RagResult};
use crate::models::{DocId, Document, RankedCandidate, Signal};

/// SHA-256 over the parsed corpus, hex encoded.
///
/// Computed from document text rather than raw file bytes, so formatting
/// changes that parse to the same documents keep the cache valid.
pub fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.question.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc.answer.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

// ============ Vector cache ============

/// Persistent store for document vectors.
#[derive(Clone)]
pub struct VectorCache {
    pool: SqlitePool,
}

impl VectorCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a complete vector set, or `None` if the cache does not hold
    /// exactly `expected` consistent vectors for this key.
    pub async fn load(
        &self,
        fingerprint: &str,
        model: &str,
        expected: usize,
    ) -> RagResult<Option<Vec<Vec<f32>>>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_index, dims, embedding
            FROM vector_cache
            WHERE fingerprint = ? AND model = ?
            ORDER BY doc_index
            "#,
        )
        .bind(fingerprint)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() != expected {
            return Ok(None);
        }

        let mut vectors = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let doc_index: i64 = row.get("doc_index");
            let dims: i64 = row.get("dims");
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            if doc_index != position as i64 || vec.len() as i64 != dims {
                return Ok(None);
            }
            vectors.push(vec);
        }

        Ok(Some(vectors))
    }

    /// Replace the cached vectors for `model` with this corpus' vectors.
    pub async fn store(
        &self,
        fingerprint: &str,
        model: &str,
        vectors: &[Vec<f32>],
    ) -> RagResult<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM vector_cache WHERE model = ?")
            .bind(model)
            .execute(&mut *tx)
            .await?;

        for (doc_index, vec) in vectors.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO vector_cache (fingerprint, model, doc_index, dims, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(fingerprint)
            .bind(model)
            .bind(doc_index as i64)
            .bind(vec.len() as i64)
            .bind(vec_to_blob(vec))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self, model: &str) -> RagResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_cache WHERE model = ?")
            .bind(model)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ============ Index ============

pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    vectors: Vec<Vec<f32>>,
    min_similarity: Option<f32>,
}

impl SemanticIndex {
    /// Embed every document (or load the cached vectors) and build the index.
    ///
    /// Any document that cannot be embedded after `max_retries` retries
    /// fails the whole build with [`RagError::IndexBuild`].
    pub async fn build(
        documents: &[Document],
        embedder: Arc<dyn Embedder>,
        cache: Option<&VectorCache>,
        max_retries: u32,
    ) -> RagResult<Self> {
        if documents.is_empty() {
            return Self::from_vectors(embedder, Vec::new());
        }

        let started = Instant::now();
        let fingerprint = corpus_fingerprint(documents);
        let model = embedder.model_name().to_string();

        if let Some(cache) = cache {
            match cache.load(&fingerprint, &model, documents.len()).await {
                Ok(Some(vectors)) => {
                    tracing::info!(
                        documents = documents.len(),
                        model = %model,
                        fingerprint = %fingerprint,
                        "semantic index loaded from cache"
                    );
                    return Self::from_vectors(embedder, vectors);
                }
                Ok(None) => {
                    tracing::info!(model = %model, "vector cache miss; embedding corpus");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "vector cache unreadable; embedding corpus");
                }
            }
        }

        let mut vectors = Vec::with_capacity(documents.len());
        for doc in documents {
            let vec = embed_with_retry(embedder.as_ref(), &doc.content(), max_retries)
                .await
                .map_err(|e| RagError::IndexBuild(format!("document {}: {}", doc.id, e)))?;
            vectors.push(vec);
        }

        let index = Self::from_vectors(embedder, vectors)?;

        if let Some(cache) = cache {
            if let Err(e) = cache.store(&fingerprint, &model, &index.vectors).await {
                tracing::warn!(error = %e, "failed to persist vector cache");
            }
        }

        tracing::info!(
            documents = documents.len(),
            dims = index.dims(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "semantic index built"
        );
        Ok(index)
    }

    /// Build from precomputed vectors, one per document in id order.
    pub fn from_vectors(embedder: Arc<dyn Embedder>, vectors: Vec<Vec<f32>>) -> RagResult<Self> {
        if let Some(first) = vectors.first() {
            let dims = first.len();
            if dims == 0 {
                return Err(RagError::IndexBuild("embedding backend returned an empty vector".into()));
            }
            if let Some(pos) = vectors.iter().position(|v| v.len() != dims) {
                return Err(RagError::IndexBuild(format!(
                    "document {} has {} dims, expected {}",
                    pos,
                    vectors[pos].len(),
                    dims
                )));
            }
        }

        Ok(Self {
            embedder,
            vectors,
            min_similarity: None,
        })
    }

    /// Drop candidates whose raw cosine similarity is below `floor`.
    pub fn with_min_similarity(mut self, floor: Option<f32>) -> Self {
        self.min_similarity = floor;
        self
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.vectors.first().map_or(0, Vec::len)
    }

    /// Embed `question` and return up to `k` nearest documents.
    pub async fn query(&self, question: &str, k: usize) -> RagResult<Vec<RankedCandidate>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(question).await?;
        if query_vec.len() != self.dims() {
            return Err(RagError::backend(
                "embedding",
                format!(
                    "query vector has {} dims, index has {}",
                    query_vec.len(),
                    self.dims()
                ),
            ));
        }
        Ok(self.nearest(&query_vec, k))
    }

    /// Rank documents by cosine similarity to `query_vec` (ties: ascending id).
    pub fn nearest(&self, query_vec: &[f32], k: usize) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vec)| (id, cosine_similarity(query_vec, vec)))
            .filter(|(_, sim)| self.min_similarity.map_or(true, |floor| *sim >= floor))
            .map(|(id, sim): (DocId, f32)| RankedCandidate::new(id, sim as f64, Signal::Semantic))
            .collect();

        ranked.sort_by(|a, b| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then(a.document_id.cmp(&b.document_id))
        });
        ranked.truncate(k);
        ranked
    }
}

async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    max_retries: u32,
) -> RagResult<Vec<f32>> {
    let mut attempt = 0u32;
    loop {
        match embedder.embed(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                // Exponential backoff: 1s, 2s, 4s, ... capped at 32s
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, error = %e, "embedding failed; retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
