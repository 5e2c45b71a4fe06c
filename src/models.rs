//! Core data models used throughout the pipeline.
//!
//! These types represent the chunks, ranked results, and answers that flow
//! from the chunker through the index to the synthesizer.

use serde::Serialize;

/// Label used for text that appears before any heading.
pub const DEFAULT_HEADING: &str = "Document";

/// A contiguous, heading-tagged span of document text sized for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position in the final chunk sequence, starting at 0.
    pub id: usize,
    /// Heading breadcrumb (`"Guide > Install"`) or [`DEFAULT_HEADING`].
    pub heading_path: String,
    /// Cleaned, length-capped, never empty.
    pub text: String,
}

/// A chunk paired with its similarity to a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f32,
}

/// How an [`Answer`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    Extractive,
    Generative,
}

/// The result of asking a question against the loaded document.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub mode: AnswerMode,
    /// Retrieved chunks, best first.
    pub sources: Vec<ScoredChunk>,
    /// Set when generation was requested but the extractive path answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}
