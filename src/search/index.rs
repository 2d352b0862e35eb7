//! Exact inner-product scoring over unit vectors.
//!
//! Every query scores every row, so results are exact rather than
//! approximate. Rows come in pre-normalized from the corpus, which makes
//! the inner product equal to cosine similarity.

use std::cmp::Ordering;

use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("k must be a positive integer")]
    InvalidK,
}

pub struct SimilarityIndex {
    vectors: Vec<f32>,
    dimensions: usize,
}

impl SimilarityIndex {
    /// Build an index over a row-major matrix of unit vectors.
    pub fn build(vectors: &[f32], dimensions: usize) -> Self {
        debug_assert!(dimensions > 0);
        debug_assert!(vectors.len() % dimensions == 0);
        SimilarityIndex {
            vectors: vectors.to_vec(),
            dimensions,
        }
    }

    /// Build an index over a subset of the matrix rows.
    ///
    /// `member_positions` may arrive unordered and with duplicates; the
    /// subset is canonicalized to ascending unique positions, so equal
    /// scores inside the subset still break ties by original position.
    pub fn build_subset(
        vectors: &[f32],
        dimensions: usize,
        member_positions: &[usize],
    ) -> SubIndex {
        let row_count = vectors.len() / dimensions;
        let mut corpus_positions: Vec<usize> = member_positions
            .iter()
            .copied()
            .filter(|position| *position < row_count)
            .collect();
        corpus_positions.sort_unstable();
        corpus_positions.dedup();

        let mut subset = Vec::with_capacity(corpus_positions.len() * dimensions);
        for position in &corpus_positions {
            let start = position * dimensions;
            subset.extend_from_slice(&vectors[start..start + dimensions]);
        }

        SubIndex {
            index: SimilarityIndex {
                vectors: subset,
                dimensions,
            },
            corpus_positions,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len() / self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Score every row against `query` and return the best `k` as
    /// `(position, score)` pairs, ordered by descending score. Equal scores
    /// order by ascending position. Returns fewer than `k` pairs when the
    /// index holds fewer rows.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK);
        }
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .par_chunks(self.dimensions)
            .enumerate()
            .map(|(position, row)| (position, dot(query, row)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored)
    }
}

/// Index over a subset of corpus rows. Search results are reported in
/// original corpus positions, not subset-local ones.
pub struct SubIndex {
    index: SimilarityIndex,
    corpus_positions: Vec<usize>,
}

impl SubIndex {
    pub fn len(&self) -> usize {
        self.corpus_positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus_positions.is_empty()
    }

    /// Ascending unique corpus positions covered by this sub-index.
    pub fn corpus_positions(&self) -> &[usize] {
        &self.corpus_positions
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        let hits = self.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .map(|(local, score)| (self.corpus_positions[local], score))
            .collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
