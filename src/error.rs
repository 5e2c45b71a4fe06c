//! Error kinds surfaced by the retrieval pipeline.
//!
//! Chunking and ranking are pure and never fail; everything here comes from
//! the collaborator boundaries (embedding, generation) or from the session's
//! index lifecycle. The CLI layer wraps these in `anyhow` for reporting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The document produced zero chunks. The index is empty but valid.
    #[error("no content indexed")]
    ChunkingProducedEmpty,

    /// The embedding collaborator failed to load or could not be reached.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generative collaborator failed. Callers fall back to extractive synthesis.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// A query arrived while no index was built or a rebuild was in progress.
    #[error("index is not ready; load a document first")]
    QueryBeforeReady,

    /// Indexing was cancelled between embedding batches.
    #[error("indexing cancelled")]
    Cancelled,

    /// Chunks and vectors disagree in length.
    #[error("index misaligned: {chunks} chunks but {vectors} vectors")]
    Misaligned { chunks: usize, vectors: usize },
}

pub type Result<T> = std::result::Result<T, RagError>;
