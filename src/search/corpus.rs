use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("embedding at position {0} has no magnitude")]
    DegenerateVector(usize),
}

/// Immutable collection of identified embedding vectors.
///
/// Rows are L2-normalized once at load time, so downstream inner products
/// are cosine similarities. Positions are stable for the lifetime of the
/// corpus and identify rows everywhere else in the engine.
#[derive(Debug)]
pub struct EmbeddingCorpus {
    identifiers: Vec<String>,
    by_identifier: HashMap<String, usize>,
    vectors: Vec<f32>,
    dimensions: usize,
}

impl EmbeddingCorpus {
    /// Build a corpus from parallel identifier and embedding arrays.
    ///
    /// Every row must have the same width and a nonzero norm. Duplicate
    /// identifiers are allowed; lookups resolve to the first occurrence.
    pub fn load(
        identifiers: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, CorpusError> {
        if identifiers.len() != embeddings.len() {
            return Err(CorpusError::ShapeMismatch(format!(
                "{} identifiers vs {} embedding rows",
                identifiers.len(),
                embeddings.len()
            )));
        }
        if identifiers.is_empty() {
            return Err(CorpusError::EmptyCorpus);
        }

        let dimensions = embeddings[0].len();
        let mut vectors = Vec::with_capacity(identifiers.len() * dimensions);
        for (position, row) in embeddings.iter().enumerate() {
            if row.len() != dimensions {
                return Err(CorpusError::ShapeMismatch(format!(
                    "row {position} has {} components, expected {dimensions}",
                    row.len()
                )));
            }
            let norm = l2_norm(row);
            if norm < f32::EPSILON {
                return Err(CorpusError::DegenerateVector(position));
            }
            vectors.extend(row.iter().map(|component| component / norm));
        }

        let mut by_identifier = HashMap::with_capacity(identifiers.len());
        for (position, identifier) in identifiers.iter().enumerate() {
            by_identifier.entry(identifier.clone()).or_insert(position);
        }

        Ok(EmbeddingCorpus {
            identifiers,
            by_identifier,
            vectors,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Position of an identifier, or `None` if the corpus has never seen it.
    pub fn position_of(&self, identifier: &str) -> Option<usize> {
        self.by_identifier.get(identifier).copied()
    }

    /// Normalized row at `position`. Panics if `position >= len()`.
    pub fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimensions;
        &self.vectors[start..start + self.dimensions]
    }

    /// The whole matrix as one row-major slice.
    pub(crate) fn vectors(&self) -> &[f32] {
        &self.vectors
    }
}

pub(crate) fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|component| component * component).sum::<f32>().sqrt()
}
