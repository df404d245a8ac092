//! Tile pyramid: which tiles are stored, and the index that finds them.

pub mod builder;
pub mod index;
pub mod persist;

pub use builder::{PyramidTile, TileIndexBuilder, TilePyramid};
pub use index::{IndexedTile, ROOT_TIP, TileIndex};
pub use persist::IndexFile;
