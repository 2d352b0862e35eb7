//! Exact similarity search over an embedding corpus.
//!
//! # Architecture
//!
//! - `corpus`: identified, normalized embedding rows with position lookup
//! - `index`: exact inner-product scoring over the full matrix or a subset
//! - `engine`: query surface with exclusions and collection scoping
//! - `artifact`: binary file I/O for corpus.bin persistence

mod artifact;
mod corpus;
mod engine;
mod index;

pub use artifact::{encoder_id, ArtifactError, CorpusArtifact, RawCorpus};
pub use corpus::{CorpusError, EmbeddingCorpus};
pub use engine::{SearchEngine, SearchError, SearchResult};
pub use index::{IndexError, SimilarityIndex, SubIndex};

pub(crate) use corpus::l2_norm;

/// Default corpus file name inside the data directory
pub const CORPUS_FILE_NAME: &str = "corpus.bin";

/// Default encoder name recorded in new corpus files
pub const DEFAULT_ENCODER: &str = "clip-vit-b-32";
