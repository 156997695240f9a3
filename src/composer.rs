//! Grounded answer composition.
//!
//! Builds a prompt that restricts the generator to the retrieved FAQ
//! entries and applies the fallback policy: with no candidates, or a top
//! fused score below the relevance threshold, the fixed
//! [`FALLBACK_ANSWER`] is returned and the generator is never called.
//! Generator failures are returned as errors, never replaced by the
//! fallback text.

use std::sync::Arc;

use crate::error::{RagError, RagResult};
use crate::generation::Generator;
use crate::models::{Document, FusedResult};

pub const FALLBACK_ANSWER: &str = "I'm not sure based on our docs.";

const PROMPT_TEMPLATE: &str = "You are a factual FAQ assistant.
Answer ONLY with sentences taken verbatim from the CONTEXT below.
If no sentence in the CONTEXT answers the question, reply exactly:
\"{fallback}\"

--------
EXAMPLE
CONTEXT:
Q: What is your refund policy?
A: Annual plans may be cancelled within 30 days for a prorated refund.

Q: What is your refund policy?
A: Annual plans may be cancelled within 30 days for a prorated refund.
--------
EXAMPLE
CONTEXT:
Q: How do I reset my password?
A: Click 'Forgot password?' on the login page and follow the link.

Q: Can I deploy on Kubernetes?
A: {fallback}
--------

CONTEXT:
{context}

Q: {question}
A:";

/// Fill the prompt template with context and question.
pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{fallback}", FALLBACK_ANSWER)
        .replace("{context}", context)
        .replace("{question}", question.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The generator produced the text from retrieved context.
    Generated,
    /// Retrieval did not support an answer; the fixed fallback was used.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub outcome: AnswerOutcome,
}

impl Answer {
    fn fallback() -> Self {
        Self {
            text: FALLBACK_ANSWER.to_string(),
            outcome: AnswerOutcome::Fallback,
        }
    }
}

pub struct AnswerComposer {
    corpus: Arc<[Document]>,
    generator: Arc<dyn Generator>,
    temperature: f32,
    relevance_threshold: f64,
}

impl AnswerComposer {
    pub fn new(
        corpus: Arc<[Document]>,
        generator: Arc<dyn Generator>,
        temperature: f32,
        relevance_threshold: f64,
    ) -> Self {
        Self {
            corpus,
            generator,
            temperature,
            relevance_threshold,
        }
    }

    /// Join the candidates' Q/A text in rank order.
    pub fn build_context(&self, candidates: &[FusedResult]) -> String {
        candidates
            .iter()
            .filter_map(|c| self.corpus.get(c.document_id))
            .map(Document::content)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Answer `question` from the retrieved `candidates`.
    pub async fn compose(&self, question: &str, candidates: &[FusedResult]) -> RagResult<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".into()));
        }

        let Some(top) = candidates
            .iter()
            .map(|c| c.fused_score)
            .max_by(f64::total_cmp)
        else {
            tracing::info!("no retrieval candidates; returning fallback answer");
            return Ok(Answer::fallback());
        };

        if top < self.relevance_threshold {
            tracing::info!(
                top_score = top,
                threshold = self.relevance_threshold,
                "top candidate below relevance threshold; returning fallback answer"
            );
            return Ok(Answer::fallback());
        }

        let context = self.build_context(candidates);
        self.generate(question, &context).await
    }

    /// Answer `question` with the whole corpus as context, bypassing
    /// retrieval. Useful for comparing against retrieval on small corpora.
    pub async fn compose_full_context(&self, question: &str) -> RagResult<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".into()));
        }
        if self.corpus.is_empty() {
            return Ok(Answer::fallback());
        }

        let context = self
            .corpus
            .iter()
            .map(Document::content)
            .collect::<Vec<_>>()
            .join("\n\n");
        self.generate(question, &context).await
    }

    async fn generate(&self, question: &str, context: &str) -> RagResult<Answer> {
        let prompt = build_prompt(context, question);
        let text = self
            .generator
            .generate(&prompt, self.temperature)
            .await
            .inspect_err(|e| tracing::error!(error = %e, model = self.generator.model_name(), "generation failed"))?;

        Ok(Answer {
            text,
            outcome: AnswerOutcome::Generated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
        last_temperature: Mutex<Option<f32>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str, temperature: f32) -> RagResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            *self.last_temperature.lock().unwrap() = Some(temperature);
            Ok("Yes, a 14-day free trial.".to_string())
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl Generator for DownGenerator {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn generate(&self, _prompt: &str, _temperature: f32) -> RagResult<String> {
            Err(RagError::backend("generation", "request timed out"))
        }
    }

    fn corpus() -> Arc<[Document]> {
        vec![
            Document {
                id: 0,
                question: "Do you offer a free trial?".into(),
                answer: "Yes, a 14-day free trial.".into(),
            },
            Document {
                id: 1,
                question: "How much does it cost?".into(),
                answer: "Essential tier starts at $49/month.".into(),
            },
        ]
        .into()
    }

    fn hit(document_id: usize, fused_score: f64, rank: usize) -> FusedResult {
        FusedResult {
            document_id,
            fused_score,
            rank,
            lexical_score: 0.0,
            semantic_score: 0.0,
        }
    }

    #[tokio::test]
    async fn test_no_candidates_falls_back_without_backend_call() {
        let generator = Arc::new(RecordingGenerator::default());
        let composer = AnswerComposer::new(corpus(), generator.clone(), 0.3, 0.0);

        let answer = composer.compose("Can I deploy on Kubernetes?", &[]).await.unwrap();
        assert_eq!(answer.text, FALLBACK_ANSWER);
        assert_eq!(answer.outcome, AnswerOutcome::Fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_falls_back_without_backend_call() {
        let generator = Arc::new(RecordingGenerator::default());
        let composer = AnswerComposer::new(corpus(), generator.clone(), 0.3, 0.5);

        let answer = composer
            .compose("free trial?", &[hit(0, 0.4, 0)])
            .await
            .unwrap();
        assert_eq!(answer.outcome, AnswerOutcome::Fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generates_from_grounded_prompt() {
        let generator = Arc::new(RecordingGenerator::default());
        let composer = AnswerComposer::new(corpus(), generator.clone(), 0.3, 0.5);

        let answer = composer
            .compose("Is there a free trial?", &[hit(0, 1.0, 0), hit(1, 0.6, 1)])
            .await
            .unwrap();
        assert_eq!(answer.outcome, AnswerOutcome::Generated);
        assert_eq!(answer.text, "Yes, a 14-day free trial.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*generator.last_temperature.lock().unwrap(), Some(0.3));

        let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
        let trial = prompt.find("Q: Do you offer a free trial?").unwrap();
        let cost = prompt.find("Q: How much does it cost?").unwrap();
        assert!(trial < cost, "context must follow rank order");
        assert!(prompt.ends_with("Q: Is there a free trial?\nA:"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_masked_by_fallback() {
        let composer = AnswerComposer::new(corpus(), Arc::new(DownGenerator), 0.3, 0.0);
        let err = composer
            .compose("free trial?", &[hit(0, 1.0, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_full_context_uses_every_document() {
        let generator = Arc::new(RecordingGenerator::default());
        let composer = AnswerComposer::new(corpus(), generator.clone(), 0.3, 0.0);

        composer.compose_full_context("price?").await.unwrap();
        let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Essential tier starts at $49/month."));
        assert!(prompt.contains("Yes, a 14-day free trial."));
    }

    #[tokio::test]
    async fn test_full_context_empty_corpus_falls_back() {
        let generator = Arc::new(RecordingGenerator::default());
        let composer = AnswerComposer::new(Vec::<Document>::new().into(), generator.clone(), 0.3, 0.0);
        let answer = composer.compose_full_context("anything").await.unwrap();
        assert_eq!(answer.outcome, AnswerOutcome::Fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_build_prompt_inserts_fallback_sentence() {
        let prompt = build_prompt("Q: a\nA: b", "  question?  ");
        assert!(prompt.contains(&format!("\"{}\"", FALLBACK_ANSWER)));
        assert!(prompt.contains("Q: question?\nA:"));
        assert!(!prompt.contains("{context}"));
    }
}
