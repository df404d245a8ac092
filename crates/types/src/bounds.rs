use crate::coordinate::Coordinate;
use geo::Rect;
use serde::{Deserialize, Serialize};

/// An axis-aligned box in the integer Mercator plane, inclusive on all sides.
///
/// [`Bounds::EMPTY`] has its minimum above its maximum, so expanding it by a
/// point yields a box around exactly that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        min_x: i32::MAX,
        min_y: i32::MAX,
        max_x: i32::MIN,
        max_y: i32::MIN,
    };

    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// A zero-area box around a single coordinate.
    pub const fn of_point(xy: Coordinate) -> Self {
        Self::new(xy.x, xy.y, xy.x, xy.y)
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Width as a 64-bit value (the root tile is wider than `i32::MAX`).
    pub fn width(&self) -> i64 {
        self.max_x as i64 - self.min_x as i64
    }

    pub fn height(&self) -> i64 {
        self.max_y as i64 - self.min_y as i64
    }

    pub fn expand_to_include(&mut self, xy: Coordinate) {
        self.min_x = self.min_x.min(xy.x);
        self.min_y = self.min_y.min(xy.y);
        self.max_x = self.max_x.max(xy.x);
        self.max_y = self.max_y.max(xy.y);
    }

    pub fn expand_to_include_bounds(&mut self, other: &Bounds) {
        if other.is_empty() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Clamp `self` to `other`. The result may be empty if the boxes are
    /// disjoint.
    pub fn simple_intersection(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        )
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            ((self.min_x as i64 + self.max_x as i64) / 2) as i32,
            ((self.min_y as i64 + self.max_y as i64) / 2) as i32,
        )
    }

    pub fn contains(&self, xy: Coordinate) -> bool {
        xy.x >= self.min_x && xy.x <= self.max_x && xy.y >= self.min_y && xy.y <= self.max_y
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        !self.simple_intersection(other).is_empty()
    }

    /// Convert to a longitude/latitude rectangle.
    pub fn to_lon_lat(&self) -> Rect<f64> {
        let min = Coordinate::new(self.min_x, self.min_y).to_lon_lat();
        let max = Coordinate::new(self.max_x, self.max_y).to_lon_lat();
        Rect::new(min.0, max.0)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl FromIterator<Coordinate> for Bounds {
    fn from_iter<I: IntoIterator<Item = Coordinate>>(iter: I) -> Self {
        let mut bounds = Bounds::EMPTY;
        for xy in iter {
            bounds.expand_to_include(xy);
        }
        bounds
    }
}
