//! # tilekit-types
//!
//! Value types shared by the tilekit storage core:
//!
//! - **Tile**: a packed quadtree cell identifier with world-space bounds
//! - **Bounds** and **Coordinate**: positions and boxes in the 32-bit
//!   integer Mercator plane, convertible to longitude/latitude via `geo`
//! - **ZoomLevels**: the sparse set of zoom levels a tile pyramid uses
//!
//! ## Examples
//!
//! ```rust
//! use geo::Point;
//! use tilekit_types::coordinate::Coordinate;
//! use tilekit_types::tile::Tile;
//!
//! let london = Coordinate::from_lon_lat(Point::new(-0.1276, 51.5072));
//! // Just west of Greenwich and north of the equator: the north-west quadrant.
//! let tile = Tile::new(0, 0, 1).unwrap();
//! assert!(tile.bounds().contains(london));
//! assert!(!Tile::new(1, 0, 1).unwrap().bounds().contains(london));
//! ```

pub mod bounds;
pub mod coordinate;
pub mod tile;
pub mod zoom;

pub use bounds::Bounds;
pub use coordinate::Coordinate;
pub use tile::{MAX_ZOOM, Tile};
pub use zoom::ZoomLevels;
