//! The assembled question-answering service.
//!
//! [`RagService`] is constructed once at startup and then shared by handle
//! (`Arc<RagService>`) with every request handler. Construction parses the
//! knowledge base, builds both indexes and opens the interaction log; no
//! query can be served before it returns.
//!
//! # Request Flow
//!
//! ```text
//! question ──► validate ──► EnsembleRetriever::retrieve(top_k)
//!                                   │
//!                                   ▼
//!                      AnswerComposer::compose ──► InteractionLog::append ──► answer
//! ```
//!
//! An answer is only returned once its interaction record is durable. A
//! failed generation call records nothing.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::composer::{Answer, AnswerComposer};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::ensemble::{EnsembleRetriever, FusionWeights};
use crate::error::{RagError, RagResult};
use crate::generation::{create_generator, Generator};
use crate::history::InteractionLog;
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::migrate;
use crate::models::{Document, FusedResult, InteractionRecord};
use crate::parser::{load_knowledge, KnowledgeBaseParser, ParseReport};
use crate::semantic::{corpus_fingerprint, SemanticIndex, VectorCache};

/// How `ask` assembles its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AskMode {
    /// Retrieve the top candidates and answer from those.
    #[default]
    Rag,
    /// Send the whole corpus as context, bypassing retrieval.
    FullContext,
}

pub struct RagService {
    corpus: Arc<[Document]>,
    fingerprint: String,
    skipped_blocks: usize,
    retriever: EnsembleRetriever,
    composer: AnswerComposer,
    log: InteractionLog,
    top_k: usize,
}

impl RagService {
    /// Build the service from configuration: read the knowledge base,
    /// open the database and construct the configured backends.
    pub async fn start(config: &Config) -> Result<Self> {
        let parser = KnowledgeBaseParser::from_config(&config.knowledge);
        let report = load_knowledge(&config.knowledge.path, &parser)?;

        let pool = db::connect(&config.db.path)
            .await
            .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
        migrate::run_migrations(&pool).await?;

        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        Self::assemble(config, report, embedder, generator, pool).await
    }

    /// Build the service from already-constructed parts. The pool must
    /// already carry the schema.
    pub async fn assemble(
        config: &Config,
        report: ParseReport,
        embedder: Option<Arc<dyn Embedder>>,
        generator: Arc<dyn Generator>,
        pool: SqlitePool,
    ) -> Result<Self> {
        let retrieval = &config.retrieval;
        let documents = report.documents;
        if let Some((position, doc)) = documents
            .iter()
            .enumerate()
            .find(|(position, doc)| doc.id != *position)
        {
            return Err(RagError::IndexBuild(format!(
                "document at position {} has id {}; ids must be 0..{}",
                position,
                doc.id,
                documents.len()
            ))
            .into());
        }
        let fingerprint = corpus_fingerprint(&documents);

        let lexical = LexicalIndex::build(
            &documents,
            Bm25Params {
                k1: retrieval.bm25_k1,
                b: retrieval.bm25_b,
            },
        );

        let semantic = match embedder {
            Some(embedder) => {
                let cache = VectorCache::new(pool.clone());
                let index = SemanticIndex::build(
                    &documents,
                    embedder,
                    Some(&cache),
                    config.embedding.max_retries,
                )
                .await
                .context("Failed to build semantic index")?;
                Some(index.with_min_similarity(retrieval.min_similarity))
            }
            None => {
                tracing::info!("embeddings disabled; retrieval is lexical-only");
                None
            }
        };

        let retriever = EnsembleRetriever::new(
            lexical,
            semantic,
            FusionWeights {
                semantic: retrieval.semantic_weight,
                lexical: retrieval.lexical_weight,
            },
            retrieval.candidate_multiplier,
        );

        let corpus: Arc<[Document]> = documents.into();
        let composer = AnswerComposer::new(
            corpus.clone(),
            generator,
            config.generation.temperature,
            retrieval.relevance_threshold,
        );
        let log = InteractionLog::new(pool, &config.history);

        tracing::info!(
            documents = corpus.len(),
            skipped = report.skipped,
            semantic = retriever.has_semantic(),
            "service ready"
        );

        Ok(Self {
            corpus,
            fingerprint,
            skipped_blocks: report.skipped,
            retriever,
            composer,
            log,
            top_k: retrieval.top_k,
        })
    }

    pub async fn ask(&self, question: &str) -> RagResult<Answer> {
        self.ask_with_mode(question, AskMode::Rag).await
    }

    /// Answer a question and durably record the exchange.
    pub async fn ask_with_mode(&self, question: &str, mode: AskMode) -> RagResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Validation("question must not be empty".into()));
        }

        let answer = match mode {
            AskMode::Rag => {
                let candidates = self.retriever.retrieve(question, self.top_k).await?;
                self.composer.compose(question, &candidates).await?
            }
            AskMode::FullContext => self.composer.compose_full_context(question).await?,
        };

        let record = self.log.append(question, &answer.text).await?;
        tracing::info!(
            interaction = record.id,
            outcome = ?answer.outcome,
            "question answered"
        );
        Ok(answer)
    }

    /// Ranked candidates for a question without generating an answer.
    pub async fn search(&self, question: &str, limit: Option<usize>) -> RagResult<Vec<FusedResult>> {
        self.retriever
            .retrieve(question, limit.unwrap_or(self.top_k))
            .await
    }

    pub async fn history(&self, limit: Option<i64>) -> RagResult<Vec<InteractionRecord>> {
        self.log.recent(limit).await
    }

    pub fn document(&self, id: usize) -> Option<&Document> {
        self.corpus.get(id)
    }

    pub fn document_count(&self) -> usize {
        self.corpus.len()
    }

    pub fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn semantic_enabled(&self) -> bool {
        self.retriever.has_semantic()
    }
}
