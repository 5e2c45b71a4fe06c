//! In-memory similarity index over one document.
//!
//! Holds chunks and their embedding vectors as parallel arrays, aligned by
//! position. Vectors are L2-normalized by the embedding layer, so cosine
//! similarity reduces to a dot product. Ranking is brute force; a single
//! document is capped at a few hundred chunks.

use crate::error::{RagError, Result};
use crate::models::{Chunk, ScoredChunk};

/// Immutable (chunk, vector) index for the currently loaded document.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an index, rejecting misaligned inputs.
    pub fn new(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(RagError::Misaligned {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        Ok(Self { chunks, vectors })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Vector dimensionality, or 0 for an empty index.
    pub fn dims(&self) -> usize {
        self.vectors.first().map_or(0, Vec::len)
    }

    /// All positions ranked against `query`, best first.
    pub fn rank(&self, query: &[f32]) -> Vec<(usize, f32)> {
        rank(query, &self.vectors)
    }

    /// The `k` best chunks for `query`, joined back by position.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        self.rank(query)
            .into_iter()
            .take(k)
            .map(|(i, similarity)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                similarity,
            })
            .collect()
    }
}

/// Dot product of two vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rank `stored` against `query` by dot product, descending.
///
/// Both sides are assumed unit length, so the score is cosine similarity.
/// Scores are clamped to `[-1, 1]` to absorb rounding; a NaN score (from a
/// degenerate vector) counts as `0.0`. Ties keep the lower index first.
pub fn rank(query: &[f32], stored: &[Vec<f32>]) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = stored
        .iter()
        .enumerate()
        .map(|(i, v)| (i, similarity(query, v)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
}

fn similarity(query: &[f32], stored: &[f32]) -> f32 {
    let score = dot(query, stored);
    if score.is_nan() {
        0.0
    } else {
        score.clamp(-1.0, 1.0)
    }
}
