//! End-to-end pipeline tests against in-memory SQLite and counting mock
//! backends.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use faq_rag::composer::{AnswerOutcome, FALLBACK_ANSWER};
use faq_rag::config::{self, Config};
use faq_rag::embedding::Embedder;
use faq_rag::error::{RagError, RagResult};
use faq_rag::generation::Generator;
use faq_rag::parser::{KnowledgeBaseParser, ParseReport};
use faq_rag::service::{AskMode, RagService};
use faq_rag::{db, migrate};
use sqlx::SqlitePool;

const KB: &str = "Q: What is CloudSphere Platform?
A: CloudSphere Platform is a unified cloud-native application suite.

---

Q: How much does CloudSphere cost?
A: The Essential tier starts at $49/month.

---

Q: Do you offer a free trial?
A: Yes. Every new account gets a 14-day free trial.

---

Q: How do I reset my password?
A: Click the reset link on the login page.

---

Q: broken block without an answer
";

const TRIAL_ANSWER: &str = "Yes. Every new account gets a 14-day free trial.";

// ============ Mock backends ============

#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

#[async_trait]
impl Generator for CountingGenerator {
    fn model_name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, prompt: &str, _temperature: f32) -> RagResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        Ok(TRIAL_ANSWER.to_string())
    }
}

struct DownGenerator;

#[async_trait]
impl Generator for DownGenerator {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _prompt: &str, _temperature: f32) -> RagResult<String> {
        Err(RagError::BackendUnavailable {
            backend: "generation",
            reason: "request timed out".to_string(),
        })
    }
}

/// Bag-of-keywords embedder. Fails every call after `fail_after` calls.
struct KeywordEmbedder {
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl KeywordEmbedder {
    const VOCAB: [&'static str; 5] = ["trial", "cost", "password", "platform", "month"];

    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_after: None,
        })
    }

    fn failing_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_after: Some(n),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(RagError::BackendUnavailable {
                backend: "embedding",
                reason: "connection refused".to_string(),
            });
        }
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = Self::VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        v.push(0.1);
        Ok(v)
    }
}

// ============ Helpers ============

fn config(extra: &str) -> Config {
    let text = format!(
        r#"
[db]
path = "unused.sqlite"

[knowledge]
path = "unused.txt"

[generation]
provider = "ollama"
url = "http://127.0.0.1:9"

{}
"#,
        extra
    );
    let config: Config = toml::from_str(&text).unwrap();
    config::validate(&config).unwrap();
    config
}

fn report() -> ParseReport {
    KnowledgeBaseParser::default().parse(KB)
}

async fn pool() -> SqlitePool {
    let pool = db::connect_in_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

async fn lexical_service(generator: Arc<dyn Generator>) -> RagService {
    RagService::assemble(&config(""), report(), None, generator, pool().await)
        .await
        .unwrap()
}

// ============ Tests ============

#[tokio::test]
async fn test_malformed_block_skipped_at_startup() {
    let service = lexical_service(Arc::new(CountingGenerator::default())).await;
    assert_eq!(service.document_count(), 4);
    assert_eq!(service.skipped_blocks(), 1);
    assert!(!service.semantic_enabled());
}

#[tokio::test]
async fn test_out_of_scope_question_falls_back_without_generation() {
    let generator = Arc::new(CountingGenerator::default());
    let service = lexical_service(generator.clone()).await;

    let answer = service.ask("Kubernetes helm charts?").await.unwrap();
    assert_eq!(answer.text, FALLBACK_ANSWER);
    assert_eq!(answer.outcome, AnswerOutcome::Fallback);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    let history = service.history(None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].answer, FALLBACK_ANSWER);
}

#[tokio::test]
async fn test_in_scope_question_is_generated_and_recorded() {
    let generator = Arc::new(CountingGenerator::default());
    let service = lexical_service(generator.clone()).await;

    let answer = service.ask("  Do you offer a free trial?  ").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Generated);
    assert_eq!(answer.text, TRIAL_ANSWER);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("Q: Do you offer a free trial?\nA: Yes. Every new account"));

    let history = service.history(Some(1)).await.unwrap();
    assert_eq!(history[0].question, "Do you offer a free trial?");
    assert_eq!(history[0].answer, TRIAL_ANSWER);
}

#[tokio::test]
async fn test_generation_failure_records_nothing() {
    let service = lexical_service(Arc::new(DownGenerator)).await;

    let err = service.ask("Do you offer a free trial?").await.unwrap_err();
    assert!(matches!(err, RagError::BackendUnavailable { backend: "generation", .. }));
    assert!(service.history(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_question_rejected_before_any_backend_call() {
    let generator = Arc::new(CountingGenerator::default());
    let embedder = KeywordEmbedder::new();
    let service = RagService::assemble(
        &config(""),
        report(),
        Some(embedder.clone()),
        generator.clone(),
        pool().await,
    )
    .await
    .unwrap();
    let build_calls = embedder.calls();

    let err = service.ask(" \t\n").await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(embedder.calls(), build_calls);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(service.history(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrelated_question_falls_back_with_example_config() {
    let config: Config = toml::from_str(include_str!("../config/faq.example.toml")).unwrap();
    config::validate(&config).unwrap();

    let generator = Arc::new(CountingGenerator::default());
    let embedder = KeywordEmbedder::new();
    let service = RagService::assemble(
        &config,
        report(),
        Some(embedder.clone()),
        generator.clone(),
        pool().await,
    )
    .await
    .unwrap();
    assert!(service.semantic_enabled());

    let answer = service.ask("What is the capital of France?").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Fallback);
    assert_eq!(answer.text, FALLBACK_ANSWER);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    // four documents at build time, one query
    assert_eq!(embedder.calls(), 5);

    let answer = service.ask("Do you offer a free trial?").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Generated);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.history(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_relevance_threshold_forces_fallback() {
    // The floor is disabled and nothing matches lexically, so the best
    // fused score is the semantic weight alone (0.6).
    let generator = Arc::new(CountingGenerator::default());
    let service = RagService::assemble(
        &config("[retrieval]\nrelevance_threshold = 0.9\nmin_similarity = -1.0\n"),
        report(),
        Some(KeywordEmbedder::new()),
        generator.clone(),
        pool().await,
    )
    .await
    .unwrap();

    let results = service.search("Kubernetes helm charts?", None).await.unwrap();
    assert!(!results.is_empty());
    assert!((results[0].fused_score - 0.6).abs() < 1e-9);

    let answer = service.ask("Kubernetes helm charts?").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Fallback);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hybrid_search_is_bounded_and_descending() {
    let service = RagService::assemble(
        &config("[retrieval]\ntop_k = 2\nmin_similarity = -1.0\n"),
        report(),
        Some(KeywordEmbedder::new()),
        Arc::new(CountingGenerator::default()),
        pool().await,
    )
    .await
    .unwrap();

    let results = service.search("How much is the monthly cost?", None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document_id, 1);
    assert!(results[0].fused_score > results[1].fused_score);
    assert_eq!(results[0].rank, 0);
    assert_eq!(results[1].rank, 1);

    let again = service.search("How much is the monthly cost?", None).await.unwrap();
    assert_eq!(results, again);
}

#[tokio::test]
async fn test_query_embedding_failure_surfaces() {
    // Four documents embed fine; the query embedding fails.
    let embedder = KeywordEmbedder::failing_after(4);
    let service = RagService::assemble(
        &config(""),
        report(),
        Some(embedder),
        Arc::new(CountingGenerator::default()),
        pool().await,
    )
    .await
    .unwrap();

    let err = service.ask("Do you offer a free trial?").await.unwrap_err();
    assert!(matches!(err, RagError::BackendUnavailable { backend: "embedding", .. }));
    assert!(service.history(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_dense_document_ids_rejected() {
    let mut report = report();
    for doc in &mut report.documents {
        doc.id += 1;
    }
    let err = RagService::assemble(
        &config(""),
        report,
        None,
        Arc::new(CountingGenerator::default()),
        pool().await,
    )
    .await
    .err()
    .unwrap();
    assert!(err.to_string().contains("has id 1"), "{}", err);
}

#[tokio::test]
async fn test_index_build_failure_is_fatal() {
    let result = RagService::assemble(
        &config("[embedding]\nmax_retries = 0\n"),
        report(),
        Some(KeywordEmbedder::failing_after(0)),
        Arc::new(CountingGenerator::default()),
        pool().await,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unchanged_corpus_reuses_cached_vectors() {
    let pool = pool().await;

    let first = KeywordEmbedder::new();
    RagService::assemble(
        &config(""),
        report(),
        Some(first.clone()),
        Arc::new(CountingGenerator::default()),
        pool.clone(),
    )
    .await
    .unwrap();
    assert_eq!(first.calls(), 4);

    let second = KeywordEmbedder::new();
    let service = RagService::assemble(
        &config(""),
        report(),
        Some(second.clone()),
        Arc::new(CountingGenerator::default()),
        pool.clone(),
    )
    .await
    .unwrap();
    assert_eq!(second.calls(), 0);
    assert!(service.semantic_enabled());
}

#[tokio::test]
async fn test_full_context_mode_sends_whole_corpus() {
    let generator = Arc::new(CountingGenerator::default());
    let service = lexical_service(generator.clone()).await;

    let answer = service
        .ask_with_mode("Kubernetes helm charts?", AskMode::FullContext)
        .await
        .unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Generated);

    let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("The Essential tier starts at $49/month."));
    assert!(prompt.contains("Click the reset link on the login page."));
    assert_eq!(service.history(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_limits_through_service() {
    let service = lexical_service(Arc::new(CountingGenerator::default())).await;
    for i in 0..12 {
        service
            .ask(&format!("Kubernetes question {}", i))
            .await
            .unwrap();
    }

    assert_eq!(service.history(None).await.unwrap().len(), 10);
    assert_eq!(service.history(Some(0)).await.unwrap().len(), 10);
    assert_eq!(service.history(Some(50)).await.unwrap().len(), 12);

    let last_three = service.history(Some(3)).await.unwrap();
    let questions: Vec<&str> = last_three.iter().map(|r| r.question.as_str()).collect();
    assert_eq!(
        questions,
        vec!["Kubernetes question 11", "Kubernetes question 10", "Kubernetes question 9"]
    );
}

#[tokio::test]
async fn test_concurrent_asks_each_recorded_once() {
    let service = Arc::new(lexical_service(Arc::new(CountingGenerator::default())).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.ask(&format!("free trial {}", i)).await.unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let history = service.history(Some(100)).await.unwrap();
    assert_eq!(history.len(), 8);
    for pair in history.windows(2) {
        assert!(pair[0].id > pair[1].id);
    }
}
