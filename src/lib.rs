//! # FAQ RAG
//!
//! Answers natural-language questions against a small, static FAQ corpus.
//! Two retrieval signals (BM25 and embedding similarity) are fused into one
//! ranking, a generation backend answers from the top candidates, and every
//! exchange is recorded in an append-only log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ knowledge    │──▶│ LexicalIndex │──▶│  Ensemble    │
//! │ base (Q/A)   │   │ SemanticIndex│   │  Retriever   │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  ▼
//!                    ┌──────▼──────┐    ┌──────────────┐   ┌──────────────┐
//!                    │ SQLite      │◀───│ Interaction  │◀──│ Answer       │
//!                    │ vector cache│    │ Log          │   │ Composer     │
//!                    └─────────────┘    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! faq init                                  # create database
//! faq check                                 # parse the knowledge base
//! faq search "free trial"                   # inspect fused rankings
//! faq ask "Do you offer a free trial?"
//! faq serve                                 # POST /ask, GET /history
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`parser`] | Knowledge-base parsing |
//! | [`lexical`] | Tokenizer and BM25 index |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`semantic`] | Vector index and fingerprinted cache |
//! | [`ensemble`] | Score normalization and weighted fusion |
//! | [`generation`] | Text-generation provider abstraction |
//! | [`composer`] | Grounded prompts and fallback policy |
//! | [`history`] | Append-only interaction log |
//! | [`service`] | Startup assembly and the ask/history operations |
//! | [`server`] | HTTP transport |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod composer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ensemble;
pub mod error;
pub mod generation;
pub mod history;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod semantic;
pub mod server;
pub mod service;
