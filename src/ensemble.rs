//! Weighted fusion of the lexical and semantic rankings.
//!
//! # Fusion Algorithm
//!
//! 1. Query both signals for `k × candidate_multiplier` candidates.
//! 2. Min-max normalize each signal's raw scores to `[0, 1]` over its own list.
//! 3. For every document seen by either signal:
//!    `fused = w_semantic × semantic + w_lexical × lexical`
//!    (a signal that missed the document contributes 0).
//! 4. Sort by fused score (desc), then document id (asc).
//! 5. Truncate to `k` and assign dense 0-based ranks.
//!
//! Steps 2–5 are pure functions ([`normalize_scores`], [`fuse`]) so the
//! algorithm can be tested without any index behind it.

use std::collections::BTreeMap;

use crate::error::{RagError, RagResult};
use crate::lexical::LexicalIndex;
use crate::models::{DocId, FusedResult, RankedCandidate};
use crate::semantic::SemanticIndex;

/// Per-signal weights used by [`fuse`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f64,
    pub lexical: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            lexical: 0.4,
        }
    }
}

/// Min-max normalize raw scores to `[0, 1]`.
///
/// A single candidate, or a list whose scores are all equal, normalizes
/// to `1.0`.
pub fn normalize_scores(candidates: &[RankedCandidate]) -> Vec<RankedCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let normalized_score = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            RankedCandidate {
                normalized_score,
                ..c.clone()
            }
        })
        .collect()
}

/// Normalize both lists, combine them with `weights` and return the top `k`.
pub fn fuse(
    lexical: &[RankedCandidate],
    semantic: &[RankedCandidate],
    weights: FusionWeights,
    k: usize,
) -> Vec<FusedResult> {
    // doc id -> (lexical, semantic) normalized components
    let mut components: BTreeMap<DocId, (f64, f64)> = BTreeMap::new();
    for c in normalize_scores(lexical) {
        components.entry(c.document_id).or_default().0 = c.normalized_score;
    }
    for c in normalize_scores(semantic) {
        components.entry(c.document_id).or_default().1 = c.normalized_score;
    }

    let mut fused: Vec<FusedResult> = components
        .into_iter()
        .map(|(document_id, (lex, sem))| FusedResult {
            document_id,
            fused_score: weights.semantic * sem + weights.lexical * lex,
            rank: 0,
            lexical_score: lex,
            semantic_score: sem,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then(a.document_id.cmp(&b.document_id))
    });
    fused.truncate(k);
    for (rank, result) in fused.iter_mut().enumerate() {
        result.rank = rank;
    }
    fused
}

/// Runs both indexes for a question and fuses their rankings.
///
/// Read-only after construction; share it behind an `Arc`.
pub struct EnsembleRetriever {
    lexical: LexicalIndex,
    semantic: Option<SemanticIndex>,
    weights: FusionWeights,
    candidate_multiplier: usize,
}

impl EnsembleRetriever {
    /// `semantic` is `None` when embeddings are disabled; retrieval is then
    /// lexical-only.
    pub fn new(
        lexical: LexicalIndex,
        semantic: Option<SemanticIndex>,
        weights: FusionWeights,
        candidate_multiplier: usize,
    ) -> Self {
        Self {
            lexical,
            semantic,
            weights,
            candidate_multiplier: candidate_multiplier.max(1),
        }
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    pub fn has_semantic(&self) -> bool {
        self.semantic.is_some()
    }

    /// Return at most `k` fused results for `question`.
    ///
    /// An empty result is not an error. A failing embedding call is.
    pub async fn retrieve(&self, question: &str, k: usize) -> RagResult<Vec<FusedResult>> {
        if question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let fan_out = k.saturating_mul(self.candidate_multiplier);

        let lexical = self.lexical.search(question, fan_out);
        let semantic = match &self.semantic {
            Some(index) => index.query(question, fan_out).await?,
            None => Vec::new(),
        };

        let results = fuse(&lexical, &semantic, self.weights, k);
        tracing::debug!(
            lexical = lexical.len(),
            semantic = semantic.len(),
            fused = results.len(),
            top_score = results.first().map(|r| r.fused_score),
            "retrieval complete"
        );
        Ok(results)
    }
}
