//! Spatial indexing of a tile's features.

pub mod hilbert;
pub mod indexer;

pub use hilbert::hilbert_distance;
pub use indexer::{IndexSummary, Indexer};
