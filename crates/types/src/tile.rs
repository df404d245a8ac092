use crate::bounds::Bounds;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Finest zoom level a [`Tile`] can address (12 bits per axis).
pub const MAX_ZOOM: u32 = 12;

/// A quadtree cell, packed into 32 bits as `zoom << 24 | row << 12 | column`.
///
/// Row 0 is the northernmost row. Tiles order by their packed value, which
/// groups them by zoom level first.
///
/// # Examples
///
/// ```
/// use tilekit_types::tile::Tile;
///
/// let tile = Tile::new(3, 1, 2).unwrap();
/// assert_eq!(tile.zoomed_out(1), Tile::new(1, 0, 1).unwrap());
/// assert_eq!(tile.to_string(), "2/3/1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tile(u32);

impl Tile {
    /// The zoom-0 tile covering the whole world.
    pub const ROOT: Tile = Tile(0);

    /// Create a tile, returning `None` if the zoom is above [`MAX_ZOOM`] or
    /// the column/row fall outside the zoom level's extent.
    pub fn new(column: u32, row: u32, zoom: u32) -> Option<Tile> {
        if zoom > MAX_ZOOM {
            return None;
        }
        let extent = 1u32 << zoom;
        if column >= extent || row >= extent {
            return None;
        }
        Some(Tile((zoom << 24) | (row << 12) | column))
    }

    /// Reinterpret a packed value. No validation is performed.
    pub const fn from_raw(raw: u32) -> Tile {
        Tile(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn column(self) -> u32 {
        self.0 & 0xfff
    }

    pub const fn row(self) -> u32 {
        (self.0 >> 12) & 0xfff
    }

    pub const fn zoom(self) -> u32 {
        self.0 >> 24
    }

    /// Number of tiles along one axis at this tile's zoom level.
    pub const fn extent(self) -> u32 {
        1 << self.zoom()
    }

    /// The ancestor of this tile at `zoom`. Returns `self` if `zoom` is not
    /// coarser than the tile's own zoom.
    pub fn zoomed_out(self, zoom: u32) -> Tile {
        let own = self.zoom();
        if zoom >= own {
            return self;
        }
        let delta = own - zoom;
        Tile((zoom << 24) | ((self.row() >> delta) << 12) | (self.column() >> delta))
    }

    /// Whether `self` lies inside `ancestor` (a tile contains itself).
    pub fn is_within(self, ancestor: Tile) -> bool {
        ancestor.zoom() <= self.zoom() && self.zoomed_out(ancestor.zoom()) == ancestor
    }

    /// Position of `self` among the descendants of its ancestor at
    /// `ancestor_zoom`, counted row-major.
    pub fn child_position(self, ancestor_zoom: u32) -> u32 {
        let delta = self.zoom().saturating_sub(ancestor_zoom);
        let mask = (1u32 << delta) - 1;
        ((self.row() & mask) << delta) | (self.column() & mask)
    }

    /// World-space bounds in the integer Mercator plane.
    ///
    /// Computed in 64-bit arithmetic so the root tile spans the full
    /// `i32` range on both axes.
    pub fn bounds(self) -> Bounds {
        let shift = 32 - self.zoom();
        let size = 1i64 << shift;
        let left = ((self.column() as i64) << shift) - (1i64 << 31);
        let top = i32::MAX as i64 - ((self.row() as i64) << shift);
        Bounds::new(
            left as i32,
            (top - size + 1) as i32,
            (left + size - 1) as i32,
            top as i32,
        )
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom(), self.column(), self.row())
    }
}

/// Parses the `zoom/column/row` form produced by `Display`.
impl FromStr for Tile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/').map(|p| p.trim().parse::<u32>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(zoom)), Some(Ok(column)), Some(Ok(row)), None) => Tile::new(column, row, zoom)
                .ok_or_else(|| format!("Tile {} is outside its zoom level", s)),
            _ => Err(format!("Invalid tile '{}', expected zoom/column/row", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let tile = Tile::new(4095, 17, 12).unwrap();
        assert_eq!(tile.column(), 4095);
        assert_eq!(tile.row(), 17);
        assert_eq!(tile.zoom(), 12);
        assert_eq!(tile.raw(), (12 << 24) | (17 << 12) | 4095);
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(Tile::new(4, 0, 2).is_none());
        assert!(Tile::new(0, 0, 13).is_none());
        assert!(Tile::new(3, 3, 2).is_some());
    }

    #[test]
    fn test_zoomed_out() {
        let tile = Tile::new(3, 2, 2).unwrap();
        assert_eq!(tile.zoomed_out(1), Tile::new(1, 1, 1).unwrap());
        assert_eq!(tile.zoomed_out(0), Tile::ROOT);
        assert_eq!(tile.zoomed_out(5), tile);
        assert!(tile.is_within(Tile::new(1, 1, 1).unwrap()));
        assert!(!tile.is_within(Tile::new(0, 1, 1).unwrap()));
    }

    #[test]
    fn test_child_position() {
        let tile = Tile::new(3, 2, 2).unwrap();
        // (row 0, column 1) inside its zoom-1 parent
        assert_eq!(tile.child_position(1), 1);
        // (row 2, column 3) inside the root
        assert_eq!(tile.child_position(0), 2 * 4 + 3);
    }

    #[test]
    fn test_root_bounds_cover_world() {
        let b = Tile::ROOT.bounds();
        assert_eq!(b.min_x, i32::MIN);
        assert_eq!(b.min_y, i32::MIN);
        assert_eq!(b.max_x, i32::MAX);
        assert_eq!(b.max_y, i32::MAX);
    }

    #[test]
    fn test_child_bounds_partition_parent() {
        let nw = Tile::new(0, 0, 1).unwrap().bounds();
        let se = Tile::new(1, 1, 1).unwrap().bounds();
        assert_eq!(nw.min_x, i32::MIN);
        assert_eq!(nw.max_x, -1);
        assert_eq!(nw.max_y, i32::MAX);
        assert_eq!(nw.min_y, 0);
        assert_eq!(se.min_x, 0);
        assert_eq!(se.max_y, -1);
        assert_eq!(se.min_y, i32::MIN);
    }

    #[test]
    fn test_display() {
        assert_eq!(Tile::new(5, 9, 4).unwrap().to_string(), "4/5/9");
    }

    #[test]
    fn test_parse() {
        assert_eq!("4/5/9".parse::<Tile>(), Ok(Tile::new(5, 9, 4).unwrap()));
        assert_eq!("0/0/0".parse::<Tile>(), Ok(Tile::ROOT));
        assert!("2/4/0".parse::<Tile>().is_err());
        assert!("2/1".parse::<Tile>().is_err());
        assert!("2/1/1/1".parse::<Tile>().is_err());
        assert!("a/b/c".parse::<Tile>().is_err());
    }
}
