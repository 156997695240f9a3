//! BM25 lexical index over the FAQ corpus.
//!
//! Each document is indexed as its question and answer text together.
//! The same [`tokenize`] function is used for documents and queries, so
//! case folding and punctuation handling are always symmetric.
//!
//! Like the semantic index, candidates are identified by the document's
//! position in the slice passed to [`LexicalIndex::build`].

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::models::{DocId, Document, RankedCandidate, Signal};

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "do", "does", "for", "if", "in",
        "into", "is", "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then",
        "there", "these", "they", "this", "to", "was", "will", "with",
        // question scaffolding shared by every FAQ entry
        "can", "how", "my", "what", "when", "where", "which", "who", "why", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, split on non-alphanumeric characters, drop stop words and
/// single-character tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// BM25 tuning constants.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug, Clone)]
struct Posting {
    doc_id: DocId,
    term_frequency: u32,
}

/// Immutable inverted index with BM25 scoring.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f64,
    params: Bm25Params,
}

impl LexicalIndex {
    pub fn build(documents: &[Document], params: Bm25Params) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(documents.len());

        for (position, doc) in documents.iter().enumerate() {
            let tokens = tokenize(&format!("{} {}", doc.question, doc.answer));
            doc_lengths.push(tokens.len() as u32);

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, term_frequency) in tf {
                postings.entry(term).or_default().push(Posting {
                    doc_id: position,
                    term_frequency,
                });
            }
        }

        let total: u64 = doc_lengths.iter().map(|&l| l as u64).sum();
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f64 / doc_lengths.len() as f64
        };

        Self {
            postings,
            doc_lengths,
            avg_doc_length,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Score pre-tokenized query terms and return up to `k` documents by
    /// descending BM25 score (ties: ascending document id). Terms absent
    /// from the corpus contribute nothing.
    pub fn query(&self, terms: &[String], k: usize) -> Vec<RankedCandidate> {
        if terms.is_empty() || self.is_empty() || k == 0 {
            return Vec::new();
        }

        let n = self.doc_lengths.len() as f64;
        let Bm25Params { k1, b } = self.params;
        let mut scores: HashMap<DocId, f64> = HashMap::new();

        for term in terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f64;
            // IDF: ln((N - df + 0.5) / (df + 0.5) + 1), always positive
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let dl = self.doc_lengths[posting.doc_id] as f64;
                let tf = posting.term_frequency as f64;
                let norm = if self.avg_doc_length > 0.0 {
                    1.0 - b + b * dl / self.avg_doc_length
                } else {
                    1.0
                };
                *scores.entry(posting.doc_id).or_insert(0.0) +=
                    idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }

        let mut ranked: Vec<RankedCandidate> = scores
            .into_iter()
            .map(|(id, score)| RankedCandidate::new(id, score, Signal::Lexical))
            .collect();
        ranked.sort_by(|a, b| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then(a.document_id.cmp(&b.document_id))
        });
        ranked.truncate(k);
        ranked
    }

    /// Tokenize `text` with the indexing tokenizer and query.
    pub fn search(&self, text: &str, k: usize) -> Vec<RankedCandidate> {
        self.query(&tokenize(text), k)
    }
}
