//! Storage core for a tiled geospatial feature store.
//!
//! ## Features
//! - **Tile pyramid**: picks which quadtree tiles to store from per-cell
//!   feature counts and builds the compact tile index that locates them
//! - **Tile model**: an arena-backed, deduplicating in-memory model of one
//!   tile, decoded from and encoded to the compact tile format
//! - **Spatial index**: Hilbert-ordered R-tree per feature type, split into
//!   key categories
//! - **Layout**: alignment-aware placement of tile elements with minimal
//!   padding
//! - **TES**: a varint exchange stream for shipping tile changes
//! - **Batch compilation**: independent tiles rebuilt in parallel
//!
//! ```rust
//! use tilekit::prelude::*;
//!
//! // A 4x4 grid at zoom 2, two cells dense enough to stand alone.
//! let levels = ZoomLevels::from_levels(&[0, 1, 2]).map_err(TileError::Configuration)?;
//! let settings = BuildSettings::default()
//!     .with_leaf_zoom(2)
//!     .with_zoom_levels(levels)
//!     .with_min_tile_density(10);
//! let counts = [5, 0, 0, 12, 0, 0, 8, 0, 3, 0, 0, 0, 0, 0, 0, 20];
//! let pyramid = TileIndexBuilder::new(settings)?.build(&counts)?;
//! assert!(pyramid.get(Tile::new(3, 0, 2).unwrap()).is_some());
//! assert!(pyramid.get(Tile::new(0, 0, 2).unwrap()).is_none());
//!
//! // One tile, written and read back.
//! let mut model = TileModel::new(Tile::ROOT);
//! let tags = model.empty_tags();
//! model.add_node(1, Coordinate::new(0, 0), tags)?;
//! let compiler = TileCompiler::new(IndexSettings::default(), TesSettings::default())?;
//! let bytes = compiler.compile_model(&mut model)?;
//! let back = TileModel::read_tile(Tile::ROOT, &bytes)?;
//! assert_eq!(back.feature_count(), 1);
//! # Ok::<(), tilekit::TileError>(())
//! ```

pub mod codec;
pub mod compiler;
pub mod config;
pub mod error;
pub mod index;
pub mod layout;
pub mod model;
pub mod pyramid;
pub mod tes;

pub use tilekit_types as types;

pub use compiler::{BatchReport, CompiledTile, FailedTile, TileCompiler, TileJob};
pub use config::{BuildSettings, IndexSettings, KeyCategory, TesSettings};
pub use error::{Result, TileError};
pub use index::{IndexSummary, Indexer};
pub use layout::{Alignment, Layout, Placeable};
pub use model::TileModel;
pub use pyramid::{IndexFile, TileIndex, TileIndexBuilder, TilePyramid};
pub use tes::{TesReader, TesWriter};

pub mod prelude {
    pub use crate::compiler::{BatchReport, TileCompiler, TileJob};
    pub use crate::config::{BuildSettings, IndexSettings, TesSettings};
    pub use crate::error::{Result, TileError};
    pub use crate::index::Indexer;
    pub use crate::model::{FeatureKind, TagTable, TileModel};
    pub use crate::pyramid::{TileIndex, TileIndexBuilder, TilePyramid};
    pub use crate::tes::{TesReader, TesWriter};
    pub use tilekit_types::{Bounds, Coordinate, Tile, ZoomLevels};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
