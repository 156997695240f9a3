//! Knowledge base parsing.
//!
//! The knowledge base is a line-oriented text file of question/answer
//! blocks:
//!
//! ```text
//! Q: How do I reset my password?
//! A: Click "Forgot password?" on the login page
//! and follow the link in the email.
//!
//! ---
//!
//! Q: Do you offer a free trial?
//! A: Yes, 14 days.
//! ```
//!
//! A block ends at a blank line, at the separator line (`---` by default),
//! or where the next question marker starts. Lines without a marker
//! continue the field above them, so answers (and questions) may span
//! several lines. Malformed blocks are skipped with a warning and counted
//! in [`ParseReport::skipped`]; parsing itself never fails.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::KnowledgeConfig;
use crate::models::Document;

/// Parser configured with the block markers.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseParser {
    question_marker: String,
    answer_marker: String,
    separator: String,
}

impl Default for KnowledgeBaseParser {
    fn default() -> Self {
        Self::new("Q:", "A:", "---")
    }
}

/// Outcome of a parse: the documents kept and how many blocks were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub documents: Vec<Document>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Question,
    Answer,
}

#[derive(Debug)]
struct Block {
    line: usize,
    question: Option<String>,
    answer: Option<String>,
    current: Option<Field>,
    defect: Option<&'static str>,
}

impl Block {
    fn new(line: usize) -> Self {
        Self {
            line,
            question: None,
            answer: None,
            current: None,
            defect: None,
        }
    }

    fn mark(&mut self, defect: &'static str) {
        self.defect.get_or_insert(defect);
    }

    fn append(&mut self, text: &str) {
        let slot = match self.current {
            Some(Field::Question) => &mut self.question,
            Some(Field::Answer) => &mut self.answer,
            None => {
                self.mark("text before any marker");
                return;
            }
        };
        if let Some(value) = slot {
            if !value.is_empty() {
                value.push('\n');
            }
            value.push_str(text);
        }
    }
}

impl KnowledgeBaseParser {
    pub fn new(
        question_marker: impl Into<String>,
        answer_marker: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            question_marker: question_marker.into(),
            answer_marker: answer_marker.into(),
            separator: separator.into(),
        }
    }

    pub fn from_config(config: &KnowledgeConfig) -> Self {
        Self::new(
            config.question_marker.clone(),
            config.answer_marker.clone(),
            config.separator.clone(),
        )
    }

    /// Parse raw knowledge-base text into documents numbered from 0.
    pub fn parse(&self, raw: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut block: Option<Block> = None;

        for (idx, line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed == self.separator {
                self.flush(block.take(), &mut report);
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix(self.question_marker.as_str()) {
                self.flush(block.take(), &mut report);
                let mut b = Block::new(line_no);
                b.question = Some(rest.trim().to_string());
                b.current = Some(Field::Question);
                block = Some(b);
            } else if let Some(rest) = trimmed.strip_prefix(self.answer_marker.as_str()) {
                let b = block.get_or_insert_with(|| Block::new(line_no));
                if b.answer.is_some() {
                    b.mark("duplicate answer marker");
                }
                b.answer = Some(rest.trim().to_string());
                b.current = Some(Field::Answer);
            } else {
                block
                    .get_or_insert_with(|| Block::new(line_no))
                    .append(trimmed);
            }
        }
        self.flush(block, &mut report);

        report
    }

    fn flush(&self, block: Option<Block>, report: &mut ParseReport) {
        let Some(block) = block else {
            return;
        };

        let question = block.question.unwrap_or_default();
        let answer = block.answer.unwrap_or_default();

        let defect = block.defect.or(if question.is_empty() {
            Some("missing question")
        } else if answer.is_empty() {
            Some("missing answer")
        } else {
            None
        });

        match defect {
            Some(reason) => {
                tracing::warn!(line = block.line, reason, "skipping malformed knowledge base block");
                report.skipped += 1;
            }
            None => report.documents.push(Document {
                id: report.documents.len(),
                question,
                answer,
            }),
        }
    }
}

/// Read and parse a knowledge-base file.
pub fn load_knowledge(path: &Path, parser: &KnowledgeBaseParser) -> Result<ParseReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read knowledge base: {}", path.display()))?;
    let report = parser.parse(&raw);
    tracing::info!(
        path = %path.display(),
        documents = report.documents.len(),
        skipped = report.skipped,
        "knowledge base loaded"
    );
    Ok(report)
}
