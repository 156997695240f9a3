//! # FAQ CLI (`faq`)
//!
//! ## Usage
//!
//! ```bash
//! faq --config ./config/faq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `faq init` | Create the SQLite database and run schema migrations |
//! | `faq check` | Parse the knowledge base and report what was loaded |
//! | `faq search "<question>"` | Show fused retrieval rankings without generating |
//! | `faq ask "<question>"` | Answer a question and record the exchange |
//! | `faq history` | Show recent interactions, newest first |
//! | `faq serve` | Start the HTTP server |
//!
//! Logs go to stderr; filter them with `RUST_LOG` (default `faq_rag=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use faq_rag::config::{self, Config};
use faq_rag::history::InteractionLog;
use faq_rag::parser::{load_knowledge, KnowledgeBaseParser};
use faq_rag::semantic::corpus_fingerprint;
use faq_rag::service::{AskMode, RagService};
use faq_rag::{db, migrate, server};

/// FAQ question answering over a static knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/faq.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "faq", version, about = "Hybrid-retrieval FAQ answering service")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/faq.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Parse the knowledge base and print document and skipped-block counts.
    Check,

    /// Show the fused ranking for a question.
    ///
    /// Prints each candidate's fused score together with its normalized
    /// lexical and semantic components.
    Search {
        question: String,

        /// Maximum number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question.
    Ask {
        question: String,

        /// `rag` answers from retrieved candidates; `full-context` sends the
        /// whole knowledge base.
        #[arg(long, value_enum, default_value_t = AskMode::Rag)]
        mode: AskMode,
    },

    /// Show recent interactions.
    History {
        /// Number of records (non-positive values use the default).
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("faq_rag=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Check => run_check(&cfg)?,
        Commands::Search { question, limit } => run_search(&cfg, &question, limit).await?,
        Commands::Ask { question, mode } => run_ask(&cfg, &question, mode).await?,
        Commands::History { limit } => run_history(&cfg, limit).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized successfully.");
    Ok(())
}

fn run_check(cfg: &Config) -> Result<()> {
    let parser = KnowledgeBaseParser::from_config(&cfg.knowledge);
    let report = load_knowledge(&cfg.knowledge.path, &parser)?;

    println!("Knowledge base: {}", cfg.knowledge.path.display());
    println!("  documents:   {}", report.documents.len());
    println!("  skipped:     {}", report.skipped);
    println!("  fingerprint: {}", corpus_fingerprint(&report.documents));
    Ok(())
}

async fn run_search(cfg: &Config, question: &str, limit: Option<usize>) -> Result<()> {
    let service = RagService::start(cfg).await?;
    let results = service.search(question, limit).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for r in &results {
        let Some(doc) = service.document(r.document_id) else {
            continue;
        };
        println!(
            "{}. [{:.3}] lexical={:.3} semantic={:.3} #{}",
            r.rank + 1,
            r.fused_score,
            r.lexical_score,
            r.semantic_score,
            r.document_id
        );
        println!("    Q: {}", doc.question);
    }
    Ok(())
}

async fn run_ask(cfg: &Config, question: &str, mode: AskMode) -> Result<()> {
    let service = RagService::start(cfg).await?;
    let answer = service.ask_with_mode(question, mode).await?;

    println!("{}", answer.text);
    Ok(())
}

async fn run_history(cfg: &Config, limit: Option<i64>) -> Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    let records = InteractionLog::new(pool, &cfg.history).recent(limit).await?;

    if records.is_empty() {
        println!("No interactions recorded.");
        return Ok(());
    }

    for r in &records {
        println!("[{}] #{}", r.timestamp.to_rfc3339(), r.id);
        println!("  Q: {}", r.question);
        println!("  A: {}", r.answer);
    }
    Ok(())
}
