//! Query surface over a corpus and its similarity index.
//!
//! The engine owns the corpus and a full index built at startup, answers
//! direct queries, item-to-item lookups and collection-scoped searches,
//! and caches sub-indexes per collection membership so repeated scoped
//! searches skip the gather step.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;

use crate::collections::Collection;
use crate::search::corpus::{l2_norm, EmbeddingCorpus};
use crate::search::index::{IndexError, SimilarityIndex, SubIndex};

/// Over-fetch multiplier for the candidate pool. The engine fetches
/// `top_k * OVERFETCH_FACTOR` candidates (capped at the corpus size) and
/// filters exclusions in rank order, so a call that excludes more than
/// two thirds of the fetched pool can return fewer than `top_k` hits even
/// when unexcluded rows remain further down the ranking.
const OVERFETCH_FACTOR: usize = 3;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("k must be a positive integer")]
    InvalidK,

    #[error("unknown item: {0}")]
    UnknownItem(String),

    #[error("query vector has no magnitude")]
    DegenerateQuery,
}

impl From<IndexError> for SearchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                SearchError::DimensionMismatch { expected, got }
            }
            IndexError::InvalidK => SearchError::InvalidK,
        }
    }
}

/// One ranked hit. `position` is the row's place in the corpus and stays
/// valid across searches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub score: f32,
    pub position: usize,
}

pub struct SearchEngine {
    corpus: EmbeddingCorpus,
    index: SimilarityIndex,
    subindexes: RwLock<HashMap<u64, Arc<SubIndex>>>,
}

impl SearchEngine {
    pub fn new(corpus: EmbeddingCorpus) -> Self {
        let index = SimilarityIndex::build(corpus.vectors(), corpus.dimensions());
        log::debug!(
            "indexed {} vectors of {} dimensions",
            corpus.len(),
            corpus.dimensions()
        );
        SearchEngine {
            corpus,
            index,
            subindexes: RwLock::new(HashMap::new()),
        }
    }

    /// Rank the whole corpus against `query` and return the best `top_k`
    /// rows not named in `exclude`.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        exclude: &HashSet<usize>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = self.normalized_query(query)?;
        let fetch = top_k
            .saturating_mul(OVERFETCH_FACTOR)
            .min(self.corpus.len());
        let candidates = self.index.search(&query, fetch)?;

        let mut results = Vec::with_capacity(top_k.min(candidates.len()));
        for (position, score) in candidates {
            if exclude.contains(&position) {
                continue;
            }
            if results.len() >= top_k {
                break;
            }
            results.push(self.to_result(position, score));
        }
        Ok(results)
    }

    /// Rank only the rows that belong to `collection`.
    ///
    /// Members that the corpus does not know are dropped. A collection
    /// whose members all resolve to nothing yields an empty result, not an
    /// error.
    pub fn search_in_collection(
        &self,
        query: &[f32],
        collection: &Collection,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let members = self.resolve_members(&collection.images);
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.normalized_query(query)?;
        let sub = self.subindex_for(&members);
        let hits = sub.search(&query, top_k)?;
        Ok(hits
            .into_iter()
            .map(|(position, score)| self.to_result(position, score))
            .collect())
    }

    /// Use a corpus row itself as the query. With `exclude_self` the row
    /// is removed from its own results, where it would otherwise rank
    /// first with a score of 1.0.
    pub fn find_similar(
        &self,
        identifier: &str,
        top_k: usize,
        exclude_self: bool,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let target = self
            .corpus
            .position_of(identifier)
            .ok_or_else(|| SearchError::UnknownItem(identifier.to_string()))?;

        let mut exclude = HashSet::new();
        if exclude_self {
            exclude.insert(target);
        }
        let query = self.corpus.vector(target).to_vec();
        self.search(&query, top_k, &exclude)
    }

    /// Map member identifiers onto canonical corpus positions: unknown
    /// identifiers are dropped, the rest sorted ascending and deduplicated.
    fn resolve_members(&self, identifiers: &[String]) -> Vec<usize> {
        let mut positions: Vec<usize> = identifiers
            .iter()
            .filter_map(|identifier| self.corpus.position_of(identifier))
            .collect();
        if positions.len() < identifiers.len() {
            log::debug!(
                "dropped {} members unknown to the corpus",
                identifiers.len() - positions.len()
            );
        }
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Fetch or build the sub-index for a canonical membership list. The
    /// cache key is a hash of the list; on a hit the stored positions are
    /// compared against the request to rule out a key collision.
    fn subindex_for(&self, members: &[usize]) -> Arc<SubIndex> {
        let fingerprint = membership_fingerprint(members);
        {
            let cache = self.subindexes.read().unwrap();
            if let Some(sub) = cache.get(&fingerprint) {
                if sub.corpus_positions() == members {
                    return Arc::clone(sub);
                }
            }
        }

        log::debug!("building sub-index over {} members", members.len());
        let sub = Arc::new(SimilarityIndex::build_subset(
            self.corpus.vectors(),
            self.corpus.dimensions(),
            members,
        ));
        self.subindexes
            .write()
            .unwrap()
            .insert(fingerprint, Arc::clone(&sub));
        sub
    }

    fn normalized_query(&self, query: &[f32]) -> Result<Vec<f32>, SearchError> {
        if query.len() != self.corpus.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: self.corpus.dimensions(),
                got: query.len(),
            });
        }
        let norm = l2_norm(query);
        if norm < f32::EPSILON {
            return Err(SearchError::DegenerateQuery);
        }
        Ok(query.iter().map(|component| component / norm).collect())
    }

    fn to_result(&self, position: usize, score: f32) -> SearchResult {
        SearchResult {
            path: self.corpus.identifiers()[position].clone(),
            score,
            position,
        }
    }

    #[cfg(test)]
    fn cached_subindex_count(&self) -> usize {
        self.subindexes.read().unwrap().len()
    }
}

fn membership_fingerprint(positions: &[usize]) -> u64 {
    let mut hasher = DefaultHasher::new();
    positions.hash(&mut hasher);
    hasher.finish()
}
