//! # markdown-qa
//!
//! Ask questions about a single Markdown document.
//!
//! The document is split into heading-aware chunks, each chunk is embedded
//! into vector space, and a question is answered by retrieving the most
//! similar chunks and either extracting the best-matching sentences or
//! handing the chunks to a generative model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Markdown │──▶│ Chunker  │──▶│  Embedding   │──▶│ VectorIndex │
//! │   text   │   │          │   │  Provider    │   │  (in-mem)   │
//! └──────────┘   └──────────┘   └──────────────┘   └──────┬──────┘
//!                                                         │ top_k
//!                                   ┌─────────────────────┤
//!                                   ▼                     ▼
//!                             ┌───────────┐        ┌────────────┐
//!                             │ Generator │ ─err─▶ │ Extractive │
//!                             │ (stream)  │        │ synthesis  │
//!                             └───────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mdqa chunks README.md
//! mdqa search README.md "installation"
//! mdqa ask README.md "How do I install it?"
//! mdqa ask README.md "How do I install it?" --generate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`text`] | Markdown cleaning and sentence helpers |
//! | [`chunk`] | Heading-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Similarity ranking |
//! | [`synthesize`] | Extractive answers |
//! | [`generate`] | Generative answers with streaming |
//! | [`session`] | Load-then-ask orchestration |
//! | [`progress`] | Indexing progress reporting |
//! | [`error`] | Pipeline error kinds |
//! | [`ask_cmd`] | CLI command implementations |

pub mod ask_cmd;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod models;
pub mod progress;
pub mod session;
pub mod synthesize;
pub mod text;
