//! Core data models shared across the pipeline.
//!
//! Documents live in a single arena (`Arc<[Document]>`) owned by the
//! service; indexes and candidates refer to them by [`DocId`], the
//! document's position in that arena.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Index of a document in the corpus arena (insertion order, stable).
pub type DocId = usize;

/// A single FAQ entry parsed from the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocId,
    pub question: String,
    pub answer: String,
}

impl Document {
    /// Text indexed by both retrieval signals and shown to the generator.
    pub fn content(&self) -> String {
        format!("Q: {}\nA: {}", self.question, self.answer)
    }
}

/// Which retrieval signal produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Lexical,
    Semantic,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Lexical => write!(f, "lexical"),
            Signal::Semantic => write!(f, "semantic"),
        }
    }
}

/// A per-signal hit. `normalized_score` is filled in during fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub document_id: DocId,
    pub raw_score: f64,
    pub normalized_score: f64,
    pub source: Signal,
}

impl RankedCandidate {
    pub fn new(document_id: DocId, raw_score: f64, source: Signal) -> Self {
        Self {
            document_id,
            raw_score,
            normalized_score: 0.0,
            source,
        }
    }
}

/// One entry of the fused ranking.
///
/// `rank` is dense and 0-based; ordering is by descending `fused_score`
/// with ties broken by ascending `document_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub document_id: DocId,
    pub fused_score: f64,
    pub rank: usize,
    /// Normalized lexical component (0.0 when the signal missed the document).
    pub lexical_score: f64,
    /// Normalized semantic component (0.0 when the signal missed the document).
    pub semantic_score: f64,
}

/// A persisted question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}
